//! File-based watermark storage

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::WatermarkStore;
use crate::error::PersistenceError;
use crate::models::{SinkId, Watermark, parse_timestamp_in};

/// On-disk shape of a watermark
#[derive(Debug, Serialize, Deserialize)]
struct PersistedWatermark {
    last_id: String,
    last_timestamp: String,
}

/// File-based watermark storage, one JSON file per sink
///
/// Directory structure:
/// ```text
/// state/
///   notion.json     # {"last_id": "...", "last_timestamp": "2025-03-01T14:30:00+00:00"}
///   mem.json
/// ```
pub struct FileWatermarkStore {
    root: PathBuf,
    naive_timezone: Tz,
}

impl FileWatermarkStore {
    /// Create a store rooted at the given directory
    ///
    /// The directory is created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            naive_timezone: chrono_tz::UTC,
        }
    }

    /// Read timestamps without an offset as wall-clock time in `tz`
    ///
    /// Only older state files hold such timestamps; this store always
    /// writes RFC 3339 with an offset.
    pub fn with_naive_timezone(mut self, tz: Tz) -> Self {
        self.naive_timezone = tz;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the file path for a sink
    pub fn watermark_path(&self, sink: &SinkId) -> PathBuf {
        self.root.join(format!("{}.json", sink.as_str()))
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self, sink: &SinkId) -> Result<Option<Watermark>, PersistenceError> {
        let path = self.watermark_path(sink);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Read { path, source }),
        };

        let persisted: PersistedWatermark =
            serde_json::from_str(&content).map_err(|e| PersistenceError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let last_timestamp = parse_timestamp_in(&persisted.last_timestamp, self.naive_timezone)
            .ok_or_else(|| PersistenceError::Corrupt {
                path: path.clone(),
                reason: format!("unreadable last_timestamp {:?}", persisted.last_timestamp),
            })?;

        Ok(Some(Watermark::new(persisted.last_id, last_timestamp)))
    }

    fn save(&self, sink: &SinkId, watermark: &Watermark) -> Result<(), PersistenceError> {
        let path = self.watermark_path(sink);
        let persisted = PersistedWatermark {
            last_id: watermark.last_id.clone(),
            last_timestamp: watermark.last_timestamp.to_rfc3339(),
        };

        let content =
            serde_json::to_vec_pretty(&persisted).map_err(|e| PersistenceError::Write {
                path: path.clone(),
                source: std::io::Error::other(e),
            })?;

        config::write_atomic(&path, &content)
            .map_err(|source| PersistenceError::Write { path, source })
    }

    fn reset(&self, sink: &SinkId) -> Result<(), PersistenceError> {
        let path = self.watermark_path(sink);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Write { path, source }),
        }
    }
}
