//! Sync engine for moving lifelogs into sinks
//!
//! Provides idempotent sync passes that can be safely re-run: each pass
//! resumes from the sink's persisted watermark.

mod dispatch;
mod filter;
mod pass;
mod status;

pub use dispatch::{DeliveryMode, DeliveryOrder, DispatchReport, SinkDispatcher};
pub use filter::{BoundaryFallback, filter_new};
pub use pass::{SinkProfile, SyncPass, run_passes};
pub use status::{PassOutcome, SyncStatus};
