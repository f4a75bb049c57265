//! Domain models for lifelog sync

mod lifelog;
mod watermark;

pub use lifelog::{LifelogId, LifelogRecord, LifelogRecordBuilder, RecordTime, parse_timestamp, parse_timestamp_in};
pub use watermark::{InvalidSinkId, SinkId, Watermark};
