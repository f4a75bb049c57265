//! Incremental filter
//!
//! Pure functions that split a fetched batch into records a sink has not
//! seen yet. Given the same batch and watermark the result is always the
//! same subset, in the batch's original order.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::limitless::Direction;
use crate::models::{LifelogRecord, Watermark};
use chrono::{DateTime, Utc};

/// What to do when the watermark id is not in the batch, e.g. because it
/// has scrolled out of the upstream window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryFallback {
    /// Deliver the whole batch
    #[default]
    TreatAllAsNew,
    /// Deliver records ending at or after the watermark timestamp
    TimestampCutoff,
}

/// Records in `batch` that are newer than `watermark`.
///
/// With a watermark id, the record carrying that id is the exclusive
/// boundary: for a newest-first batch everything before it is new, for an
/// oldest-first batch everything after it. Without an id, records whose end
/// time is at or after the watermark timestamp are new.
pub fn filter_new(
    batch: &[LifelogRecord],
    direction: Direction,
    watermark: &Watermark,
    fallback: BoundaryFallback,
) -> Vec<LifelogRecord> {
    if watermark.is_initial() {
        return since_timestamp(batch, watermark.last_timestamp);
    }

    let boundary = batch
        .iter()
        .position(|record| record.id.as_str() == watermark.last_id);

    match (boundary, direction) {
        (Some(pos), Direction::Desc) => batch[..pos].to_vec(),
        (Some(pos), Direction::Asc) => batch[pos + 1..].to_vec(),
        (None, _) => match fallback {
            BoundaryFallback::TreatAllAsNew => {
                debug!(
                    "Watermark id {} not in batch of {}, treating all as new",
                    watermark.last_id,
                    batch.len()
                );
                batch.to_vec()
            }
            BoundaryFallback::TimestampCutoff => {
                debug!(
                    "Watermark id {} not in batch of {}, falling back to timestamp {}",
                    watermark.last_id,
                    batch.len(),
                    watermark.last_timestamp.to_rfc3339()
                );
                since_timestamp(batch, watermark.last_timestamp)
            }
        },
    }
}

/// Records ending at or after `cutoff`; unparseable end times are kept
fn since_timestamp(batch: &[LifelogRecord], cutoff: DateTime<Utc>) -> Vec<LifelogRecord> {
    batch
        .iter()
        .filter(|record| match record.ended_at() {
            Some(ended) => ended >= cutoff,
            None => {
                warn!(
                    "Lifelog {} has unreadable endTime {:?}, including it",
                    record.id, record.end_time.raw
                );
                true
            }
        })
        .cloned()
        .collect()
}
