//! In-memory watermark storage
//!
//! Used in tests and by embedders that persist progress elsewhere.

use std::collections::HashMap;
use std::sync::RwLock;

use super::WatermarkStore;
use crate::error::PersistenceError;
use crate::models::{SinkId, Watermark};

/// In-memory implementation of WatermarkStore
///
/// Uses a HashMap protected by a RwLock for thread-safe access.
pub struct InMemoryWatermarkStore {
    watermarks: RwLock<HashMap<String, Watermark>>,
}

impl InMemoryWatermarkStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            watermarks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sinks with a stored watermark
    pub fn len(&self) -> usize {
        self.watermarks.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryWatermarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    fn load(&self, sink: &SinkId) -> Result<Option<Watermark>, PersistenceError> {
        let watermarks = self.watermarks.read().unwrap_or_else(|p| p.into_inner());
        Ok(watermarks.get(sink.as_str()).cloned())
    }

    fn save(&self, sink: &SinkId, watermark: &Watermark) -> Result<(), PersistenceError> {
        let mut watermarks = self.watermarks.write().unwrap_or_else(|p| p.into_inner());
        watermarks.insert(sink.as_str().to_string(), watermark.clone());
        Ok(())
    }

    fn reset(&self, sink: &SinkId) -> Result<(), PersistenceError> {
        let mut watermarks = self.watermarks.write().unwrap_or_else(|p| p.into_inner());
        watermarks.remove(sink.as_str());
        Ok(())
    }
}
