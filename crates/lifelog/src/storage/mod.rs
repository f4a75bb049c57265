//! Watermark storage
//!
//! One keyed store abstraction for per-sink progress. The trait-based design
//! allows swapping between the file-backed store and an in-memory store.

mod file;
mod memory;
mod traits;

pub use file::FileWatermarkStore;
pub use memory::InMemoryWatermarkStore;
pub use traits::WatermarkStore;
