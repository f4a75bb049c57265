//! One fetch, filter, dispatch, persist cycle for a single sink

use chrono::{Days, Duration, NaiveDate};
use chrono_tz::Tz;
use log::{error, info, warn};
use rayon::prelude::*;
use std::sync::Arc;

use super::dispatch::{DeliveryMode, DeliveryOrder, DispatchReport, SinkDispatcher};
use super::filter::{BoundaryFallback, filter_new};
use super::status::{PassOutcome, SyncStatus};
use crate::clock::{CancelToken, Clock};
use crate::error::SyncError;
use crate::limitless::{Direction, FetchRequest, LifelogClient};
use crate::models::{LifelogRecord, SinkId, Watermark};
use crate::sinks::Sink;
use crate::storage::WatermarkStore;

/// Per-sink sync settings
#[derive(Debug, Clone, PartialEq)]
pub struct SinkProfile {
    pub id: SinkId,
    /// Age of the starting watermark when none is persisted
    pub lookback: Duration,
    pub boundary_fallback: BoundaryFallback,
    pub delivery_mode: DeliveryMode,
    pub delivery_order: DeliveryOrder,
    /// Timezone upstream dates are interpreted in
    pub timezone: Tz,
    /// Page size for upstream requests
    pub batch_size: usize,
    /// Oldest calendar day fetched, counted back from today
    pub max_catch_up_days: u32,
}

impl SinkProfile {
    pub fn new(id: SinkId, timezone: Tz) -> Self {
        Self {
            id,
            lookback: Duration::days(7),
            boundary_fallback: BoundaryFallback::default(),
            delivery_mode: DeliveryMode::default(),
            delivery_order: DeliveryOrder::default(),
            timezone,
            batch_size: 10,
            max_catch_up_days: 7,
        }
    }

    /// Settings for the structured record store: week-long lookback,
    /// one page per lifelog
    pub fn structured(id: SinkId, timezone: Tz) -> Self {
        Self {
            lookback: Duration::days(7),
            boundary_fallback: BoundaryFallback::TreatAllAsNew,
            delivery_mode: DeliveryMode::PerRecord,
            delivery_order: DeliveryOrder::Chronological,
            ..Self::new(id, timezone)
        }
    }

    /// Settings for the note store: hour-long lookback, one note per pass
    pub fn note(id: SinkId, timezone: Tz) -> Self {
        Self {
            lookback: Duration::hours(1),
            boundary_fallback: BoundaryFallback::TimestampCutoff,
            delivery_mode: DeliveryMode::Batch,
            delivery_order: DeliveryOrder::NewestFirst,
            ..Self::new(id, timezone)
        }
    }
}

/// Counters gathered while a pass runs
#[derive(Debug, Default)]
struct PassCounts {
    fetched: usize,
    new_records: usize,
}

/// A configured sync pass for one sink
///
/// Running it repeatedly is safe: each run starts from the persisted
/// watermark and only moves it over confirmed deliveries.
pub struct SyncPass {
    profile: SinkProfile,
    client: Arc<LifelogClient>,
    store: Arc<dyn WatermarkStore>,
    sink: Arc<dyn Sink>,
    clock: Arc<dyn Clock>,
}

impl SyncPass {
    pub fn new(
        profile: SinkProfile,
        client: Arc<LifelogClient>,
        store: Arc<dyn WatermarkStore>,
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile,
            client,
            store,
            sink,
            clock,
        }
    }

    pub fn sink_id(&self) -> &SinkId {
        &self.profile.id
    }

    pub fn profile(&self) -> &SinkProfile {
        &self.profile
    }

    fn initial_watermark(&self) -> Watermark {
        Watermark::initial(self.clock.now(), self.profile.lookback)
    }

    /// Run the pass to completion and report how it went
    pub fn run(&self, cancel: &CancelToken) -> SyncStatus {
        let started_at = self.clock.now();
        let mut counts = PassCounts::default();
        info!("{}: sync pass started", self.profile.id);

        let (outcome, delivered, failed) = match self.execute(cancel, &mut counts) {
            Ok(None) => (PassOutcome::UpToDate, 0, 0),
            Ok(Some(report)) => (outcome_of(&report), report.delivered.len(), report.failed.len()),
            Err(SyncError::Cancelled) => (PassOutcome::Cancelled, 0, 0),
            Err(e) => {
                error!("{}: sync pass failed: {}", self.profile.id, e);
                (
                    PassOutcome::Failed {
                        error: e.to_string(),
                    },
                    0,
                    0,
                )
            }
        };

        let status = SyncStatus {
            sink: self.profile.id.to_string(),
            started_at,
            finished_at: self.clock.now(),
            outcome,
            fetched: counts.fetched,
            new_records: counts.new_records,
            delivered,
            failed,
            watermark: self.store.get(&self.profile.id, self.initial_watermark()),
        };

        info!(
            "{}: sync pass finished ({:?}): {} fetched, {} new, {} delivered, {} failed",
            status.sink,
            status.outcome,
            status.fetched,
            status.new_records,
            status.delivered,
            status.failed
        );
        status
    }

    /// `Ok(None)` when there was nothing new to deliver
    fn execute(
        &self,
        cancel: &CancelToken,
        counts: &mut PassCounts,
    ) -> Result<Option<DispatchReport>, SyncError> {
        let watermark = self.store.get(&self.profile.id, self.initial_watermark());
        info!(
            "{}: last delivered id {:?} at {}",
            self.profile.id,
            watermark.last_id,
            watermark.last_timestamp.to_rfc3339()
        );

        let batch = self.fetch_window(&watermark, cancel)?;
        counts.fetched = batch.len();

        let fresh = filter_new(
            &batch,
            Direction::Desc,
            &watermark,
            self.profile.boundary_fallback,
        );
        counts.new_records = fresh.len();
        info!("{}: found {} new lifelogs", self.profile.id, fresh.len());

        if fresh.is_empty() {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Newest-first from upstream; the dispatcher wants oldest first
        let chronological: Vec<LifelogRecord> = fresh.into_iter().rev().collect();

        let report = SinkDispatcher::new(&self.profile.id, self.sink.as_ref(), self.store.as_ref())
            .with_mode(self.profile.delivery_mode)
            .with_order(self.profile.delivery_order)
            .dispatch(&chronological, &watermark, cancel)?;

        Ok(Some(report))
    }

    /// Fetch every day from the watermark's day through today, newest first.
    ///
    /// Days before the watermark cannot hold undelivered records, so only
    /// today is fetched for an up-to-date sink.
    fn fetch_window(
        &self,
        watermark: &Watermark,
        cancel: &CancelToken,
    ) -> Result<Vec<LifelogRecord>, SyncError> {
        let tz = self.profile.timezone;
        let today = self.clock.now().with_timezone(&tz).date_naive();
        let oldest_allowed = oldest_day(today, self.profile.max_catch_up_days);
        let from = watermark
            .last_timestamp
            .with_timezone(&tz)
            .date_naive()
            .clamp(oldest_allowed, today);

        let mut batch = Vec::new();
        for date in days_newest_first(from, today) {
            let request = FetchRequest {
                date: Some(date),
                direction: Direction::Desc,
                timezone: Some(tz.name().to_string()),
                limit: None,
                batch_size: self.profile.batch_size,
                ..FetchRequest::default()
            };
            let records = self.client.fetch(&request, cancel)?;
            if records.is_empty() {
                info!("{}: no lifelogs for {}", self.profile.id, date);
            }
            batch.extend(records);
        }

        if from < oldest_allowed {
            warn!(
                "{}: watermark older than {} days, records before {} are skipped",
                self.profile.id, self.profile.max_catch_up_days, oldest_allowed
            );
        }
        Ok(batch)
    }
}

fn outcome_of(report: &DispatchReport) -> PassOutcome {
    if report.cancelled {
        return PassOutcome::Cancelled;
    }
    match (report.delivered.is_empty(), report.failed.first()) {
        (_, None) => PassOutcome::Delivered,
        (false, Some(_)) => PassOutcome::PartiallyDelivered,
        (true, Some((id, cause))) => PassOutcome::Failed {
            error: format!("{} deliveries failed, first ({}): {}", report.failed.len(), id, cause),
        },
    }
}

/// `days` before `today`, or the earliest representable date
fn oldest_day(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Dates from `today` back to `from`, inclusive
fn days_newest_first(from: NaiveDate, today: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = today;
    while day >= from {
        days.push(day);
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    days
}

/// Run one pass per sink in parallel
///
/// Each pass owns its sink's watermark, so passes never contend.
pub fn run_passes(passes: &[SyncPass], cancel: &CancelToken) -> Vec<SyncStatus> {
    passes.par_iter().map(|pass| pass.run(cancel)).collect()
}
