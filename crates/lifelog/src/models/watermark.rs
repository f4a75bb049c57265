//! Watermark tracking for incremental sync
//!
//! A watermark marks how far a sink has been fed: the id and end time of the
//! newest lifelog it has confirmed. One watermark exists per sink.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::LifelogRecord;

/// Name of a sink, doubling as its watermark storage key
///
/// Restricted to ASCII letters, digits, `-` and `_` so that every sink maps
/// to its own file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SinkId(String);

/// Error for sink names that cannot be used as storage keys
#[derive(Debug, thiserror::Error)]
#[error("invalid sink name {0:?}: use letters, digits, '-' or '_'")]
pub struct InvalidSinkId(pub String);

impl SinkId {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidSinkId> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(InvalidSinkId(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted progress for one sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Id of the newest delivered lifelog; empty before the first delivery
    pub last_id: String,
    /// End time of the newest delivered lifelog, or the lookback cutoff
    pub last_timestamp: DateTime<Utc>,
}

impl Watermark {
    pub fn new(last_id: impl Into<String>, last_timestamp: DateTime<Utc>) -> Self {
        Self {
            last_id: last_id.into(),
            last_timestamp,
        }
    }

    /// Starting point for a sink with no persisted progress
    ///
    /// A lookback reaching past the representable range starts from the
    /// earliest representable instant.
    pub fn initial(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            last_id: String::new(),
            last_timestamp: now
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Whether no lifelog has been delivered yet
    pub fn is_initial(&self) -> bool {
        self.last_id.is_empty()
    }

    /// Watermark after confirming delivery of `record`.
    ///
    /// The timestamp never moves backwards: a record older than the current
    /// watermark, or one whose end time is unreadable, only moves the id.
    pub fn advanced_to(&self, record: &LifelogRecord) -> Self {
        let last_timestamp = match record.ended_at() {
            Some(ended) if ended > self.last_timestamp => ended,
            _ => self.last_timestamp,
        };
        Self {
            last_id: record.id.as_str().to_string(),
            last_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_initial_watermark() {
        let wm = Watermark::initial(at(12), Duration::hours(1));
        assert!(wm.is_initial());
        assert_eq!(wm.last_timestamp, at(11));
    }

    #[test]
    fn test_initial_watermark_saturates() {
        let wm = Watermark::initial(at(12), Duration::MAX);
        assert_eq!(wm.last_timestamp, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_advanced_to_newer_record() {
        let wm = Watermark::new("a", at(10));
        let record = LifelogRecord::builder("b", "2025-03-01T11:00:00Z").build();
        let next = wm.advanced_to(&record);
        assert_eq!(next.last_id, "b");
        assert_eq!(next.last_timestamp, at(11));
    }

    #[test]
    fn test_advanced_to_older_record_keeps_timestamp() {
        let wm = Watermark::new("a", at(10));
        let record = LifelogRecord::builder("old", "2025-03-01T08:00:00Z").build();
        let next = wm.advanced_to(&record);
        assert_eq!(next.last_id, "old");
        assert_eq!(next.last_timestamp, at(10));
    }

    #[test]
    fn test_advanced_to_unparseable_record() {
        let wm = Watermark::new("a", at(10));
        let record = LifelogRecord::builder("x", "garbled").build();
        let next = wm.advanced_to(&record);
        assert_eq!(next.last_id, "x");
        assert_eq!(next.last_timestamp, at(10));
    }

    #[test]
    fn test_sink_id_validation() {
        assert!(SinkId::new("notion").is_ok());
        assert!(SinkId::new("mem_smart-2").is_ok());
        assert!(SinkId::new("").is_err());
        assert!(SinkId::new("../etc").is_err());
        assert!(SinkId::new("a b").is_err());
    }

    #[test]
    fn test_serialization() {
        let wm = Watermark::new("abc", at(9));
        let json = serde_json::to_string(&wm).unwrap();
        let deserialized: Watermark = serde_json::from_str(&json).unwrap();
        assert_eq!(wm, deserialized);
    }
}
