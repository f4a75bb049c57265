//! Lifelog record model

use chrono::{DateTime, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Unique identifier for a lifelog (upstream record ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifelogId(pub String);

impl LifelogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LifelogId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LifelogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for LifelogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A timestamp as received from upstream.
///
/// The raw string is kept so it can be forwarded verbatim to sinks, even
/// when it cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTime {
    pub raw: String,
    pub parsed: Option<DateTime<Utc>>,
}

impl RecordTime {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = parse_timestamp(&raw);
        Self { raw, parsed }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            raw: dt.to_rfc3339(),
            parsed: Some(dt),
        }
    }
}

/// Parse an upstream or persisted timestamp.
///
/// Accepts RFC 3339 (with `Z` or an explicit offset). Naive ISO-8601
/// date-times without an offset are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_in(s, chrono_tz::UTC)
}

/// Like [`parse_timestamp`], but naive date-times are wall-clock time in
/// `tz`. A wall-clock time skipped by a DST jump uses the offset in effect
/// just after the jump.
pub fn parse_timestamp_in(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| {
            let offset = tz.offset_from_local_datetime(&naive).earliest().or_else(|| {
                naive
                    .checked_add_signed(TimeDelta::hours(1))
                    .and_then(|later| tz.offset_from_local_datetime(&later).earliest())
            })?;
            let shift = TimeDelta::seconds(i64::from(offset.fix().local_minus_utc()));
            naive.checked_sub_signed(shift).map(|utc| utc.and_utc())
        })
}

/// A validated lifelog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifelogRecord {
    pub id: LifelogId,
    pub title: String,
    pub markdown: String,
    pub start_time: Option<RecordTime>,
    pub end_time: RecordTime,
}

impl LifelogRecord {
    /// Title used when upstream sends none
    pub const UNTITLED: &'static str = "Untitled conversation";

    /// Start building a record with the required fields
    pub fn builder(id: impl Into<LifelogId>, end_time: impl Into<String>) -> LifelogRecordBuilder {
        LifelogRecordBuilder::new(id.into(), end_time.into())
    }

    /// Parsed end time, if upstream sent a readable timestamp
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end_time.parsed
    }
}

/// Builder for LifelogRecord
pub struct LifelogRecordBuilder {
    id: LifelogId,
    end_time: String,
    title: Option<String>,
    markdown: String,
    start_time: Option<String>,
}

impl LifelogRecordBuilder {
    fn new(id: LifelogId, end_time: String) -> Self {
        Self {
            id,
            end_time,
            title: None,
            markdown: String::new(),
            start_time: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = markdown.into();
        self
    }

    pub fn start_time(mut self, start_time: impl Into<String>) -> Self {
        self.start_time = Some(start_time.into());
        self
    }

    pub fn build(self) -> LifelogRecord {
        LifelogRecord {
            id: self.id,
            title: self
                .title
                .unwrap_or_else(|| LifelogRecord::UNTITLED.to_string()),
            markdown: self.markdown,
            start_time: self.start_time.map(RecordTime::parse),
            end_time: RecordTime::parse(self.end_time),
        }
    }
}
