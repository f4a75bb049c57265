//! Storage trait definitions

use chrono::{DateTime, Utc};
use log::warn;

use crate::error::PersistenceError;
use crate::models::{SinkId, Watermark};

/// Trait for watermark storage
///
/// Each sink's watermark lives under its own key, so stores can be shared
/// by concurrently running sink pipelines.
pub trait WatermarkStore: Send + Sync {
    /// Read the persisted watermark, surfacing any error
    fn load(&self, sink: &SinkId) -> Result<Option<Watermark>, PersistenceError>;

    /// Replace the persisted watermark; must not leave a torn record
    fn save(&self, sink: &SinkId, watermark: &Watermark) -> Result<(), PersistenceError>;

    /// Remove the persisted watermark (manual rewind)
    fn reset(&self, sink: &SinkId) -> Result<(), PersistenceError>;

    /// Watermark for `sink`, or `fallback` when none is usable.
    ///
    /// Unreadable or corrupt state is logged and replaced by `fallback`
    /// rather than failing the caller.
    fn get(&self, sink: &SinkId, fallback: Watermark) -> Watermark {
        match self.load(sink) {
            Ok(Some(watermark)) => watermark,
            Ok(None) => fallback,
            Err(e) => {
                warn!(
                    "Watermark for {} unusable ({}), starting from {}",
                    sink,
                    e,
                    fallback.last_timestamp.to_rfc3339()
                );
                fallback
            }
        }
    }

    /// Overwrite the full watermark for `sink`
    fn set(
        &self,
        sink: &SinkId,
        last_id: &str,
        last_timestamp: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.save(sink, &Watermark::new(last_id, last_timestamp))
    }
}
