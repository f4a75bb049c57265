//! Status value reported by each sync pass
//!
//! Schedulers and dashboards read this instead of shared process state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Watermark;

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Nothing new upstream
    UpToDate,
    /// Every new record was delivered
    Delivered,
    /// Some records were delivered, some will be retried next pass
    PartiallyDelivered,
    /// Nothing was delivered; the watermark is unchanged
    Failed { error: String },
    /// Aborted by the supervisor
    Cancelled,
}

/// Summary of one sync pass for one sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub sink: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: PassOutcome,
    /// Records returned by upstream
    pub fetched: usize,
    /// Records newer than the watermark
    pub new_records: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Watermark in effect after the pass
    pub watermark: Watermark,
}

impl SyncStatus {
    /// Whether the pass left nothing to retry
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PassOutcome::UpToDate | PassOutcome::Delivered)
    }
}
