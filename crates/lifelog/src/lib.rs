//! Lifelog crate - Incremental sync of lifelogs into downstream sinks
//!
//! This crate provides:
//! - Domain models (LifelogRecord, Watermark, SinkId)
//! - Limitless API client with cursor pagination and bounded retry
//! - Watermark storage trait with file and in-memory backends
//! - Incremental filter and sink dispatcher
//! - Notion and Mem sinks
//! - Configuration loading and sync pass orchestration
//!
//! All I/O goes through the `HttpTransport` and `Clock` seams, so every
//! component can be driven deterministically in tests.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod limitless;
pub mod models;
pub mod sinks;
pub mod storage;
pub mod sync;

pub use clock::{CancelToken, Clock, ManualClock, SystemClock};
pub use config::{SinkConfig, SinkKind, SyncConfig};
pub use error::{
    ConfigError, FetchError, PersistenceError, SinkError, SyncError, TransientFailure,
    TransportError,
};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, UreqTransport};
pub use limitless::{Direction, FetchRequest, LifelogClient, LifelogPages, Page, RetryPolicy};
pub use models::{LifelogId, LifelogRecord, RecordTime, SinkId, Watermark};
pub use sinks::{DeliveryReceipt, MemSink, NotionSink, Sink};
pub use storage::{FileWatermarkStore, InMemoryWatermarkStore, WatermarkStore};
pub use sync::{
    // Building blocks
    BoundaryFallback, DeliveryMode, DeliveryOrder, DispatchReport, SinkDispatcher, filter_new,
    // Orchestration
    PassOutcome, SinkProfile, SyncPass, SyncStatus, run_passes,
};
