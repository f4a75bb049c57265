//! Validate raw API items into LifelogRecord

use super::api::RawLifelog;
use crate::models::{LifelogId, LifelogRecord, RecordTime};

/// Why a raw item could not become a record
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("lifelog is not a JSON object of the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("lifelog missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// Convert one raw API item into a LifelogRecord.
///
/// `id` and `endTime` are required; everything else has a default.
pub fn normalize_lifelog(value: serde_json::Value) -> Result<LifelogRecord, NormalizeError> {
    let raw: RawLifelog = serde_json::from_value(value)?;

    let id = required(raw.id, "id")?;
    let end_time = required(raw.end_time, "endTime")?;

    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| LifelogRecord::UNTITLED.to_string());

    Ok(LifelogRecord {
        id: LifelogId::new(id),
        title,
        markdown: raw.markdown.unwrap_or_default(),
        start_time: raw
            .start_time
            .filter(|s| !s.is_empty())
            .map(RecordTime::parse),
        end_time: RecordTime::parse(end_time),
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, NormalizeError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(NormalizeError::MissingField { field })
}
