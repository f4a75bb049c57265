//! Sink dispatcher
//!
//! Hands filtered lifelogs to a sink and moves the sink's watermark forward
//! only over deliveries the sink confirmed. A crash between a confirmed
//! delivery and the watermark write re-sends that delivery on the next
//! pass; sinks must tolerate duplicates.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::CancelToken;
use crate::error::SyncError;
use crate::models::{LifelogId, LifelogRecord, SinkId, Watermark};
use crate::sinks::Sink;
use crate::storage::WatermarkStore;

/// How records are grouped into delivery calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One call per record; failures are skipped
    #[default]
    PerRecord,
    /// One call for all records; all or nothing
    Batch,
}

/// Order of records across (or within) delivery calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrder {
    #[default]
    Chronological,
    NewestFirst,
}

/// Result of dispatching one set of records
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Records the sink confirmed, in delivery order
    pub delivered: Vec<LifelogId>,
    /// Records the sink did not confirm, with the cause
    pub failed: Vec<(LifelogId, String)>,
    /// Watermark in effect after dispatch
    pub watermark: Watermark,
    /// Dispatch stopped early on cancellation
    pub cancelled: bool,
}

impl DispatchReport {
    fn unchanged(watermark: &Watermark) -> Self {
        Self {
            delivered: Vec::new(),
            failed: Vec::new(),
            watermark: watermark.clone(),
            cancelled: false,
        }
    }
}

/// Delivers records to one sink and persists its progress
pub struct SinkDispatcher<'a> {
    sink_id: &'a SinkId,
    sink: &'a dyn Sink,
    store: &'a dyn WatermarkStore,
    mode: DeliveryMode,
    order: DeliveryOrder,
}

impl<'a> SinkDispatcher<'a> {
    pub fn new(sink_id: &'a SinkId, sink: &'a dyn Sink, store: &'a dyn WatermarkStore) -> Self {
        Self {
            sink_id,
            sink,
            store,
            mode: DeliveryMode::default(),
            order: DeliveryOrder::default(),
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_order(mut self, order: DeliveryOrder) -> Self {
        self.order = order;
        self
    }

    /// Deliver `records`, which must be oldest first, on top of `current`.
    ///
    /// Returns an error only when progress could not be persisted.
    pub fn dispatch(
        &self,
        records: &[LifelogRecord],
        current: &Watermark,
        cancel: &CancelToken,
    ) -> Result<DispatchReport, SyncError> {
        if records.is_empty() {
            return Ok(DispatchReport::unchanged(current));
        }

        match self.mode {
            DeliveryMode::PerRecord => self.dispatch_each(records, current, cancel),
            DeliveryMode::Batch => self.dispatch_batch(records, current),
        }
    }

    /// Indices of `records` in delivery order
    fn delivery_order(&self, len: usize) -> Vec<usize> {
        match self.order {
            DeliveryOrder::Chronological => (0..len).collect(),
            DeliveryOrder::NewestFirst => (0..len).rev().collect(),
        }
    }

    /// One call per record.
    ///
    /// The watermark only covers the longest oldest-first run of confirmed
    /// records: a failed record holds it back even if newer records were
    /// confirmed after it, so the failed record is retried next pass.
    fn dispatch_each(
        &self,
        records: &[LifelogRecord],
        current: &Watermark,
        cancel: &CancelToken,
    ) -> Result<DispatchReport, SyncError> {
        let mut report = DispatchReport::unchanged(current);
        let mut confirmed = vec![false; records.len()];
        let mut prefix = 0;

        for index in self.delivery_order(records.len()) {
            if cancel.is_cancelled() {
                info!("{}: dispatch cancelled", self.sink_id);
                report.cancelled = true;
                break;
            }

            let record = &records[index];
            match self.sink.deliver(std::slice::from_ref(record)) {
                Ok(_) => {
                    confirmed[index] = true;
                    report.delivered.push(record.id.clone());
                }
                Err(e) => {
                    warn!(
                        "{}: failed to deliver lifelog {} to {}: {}",
                        self.sink_id,
                        record.id,
                        self.sink.name(),
                        e
                    );
                    report.failed.push((record.id.clone(), e.to_string()));
                    continue;
                }
            }

            let start = prefix;
            while prefix < confirmed.len() && confirmed[prefix] {
                prefix += 1;
            }
            if prefix > start {
                report.watermark = records[start..prefix]
                    .iter()
                    .fold(report.watermark, |wm, r| wm.advanced_to(r));
                self.store.save(self.sink_id, &report.watermark)?;
            }
        }

        Ok(report)
    }

    /// One call for everything; the watermark moves to the newest record
    /// only if the sink confirms the whole call
    fn dispatch_batch(
        &self,
        records: &[LifelogRecord],
        current: &Watermark,
    ) -> Result<DispatchReport, SyncError> {
        let ordered: Vec<LifelogRecord> = self
            .delivery_order(records.len())
            .into_iter()
            .map(|i| records[i].clone())
            .collect();

        let mut report = DispatchReport::unchanged(current);

        match self.sink.deliver(&ordered) {
            Ok(_) => {
                report.watermark = records
                    .iter()
                    .fold(current.clone(), |wm, r| wm.advanced_to(r));
                self.store.save(self.sink_id, &report.watermark)?;
                report.delivered = ordered.into_iter().map(|r| r.id).collect();
            }
            Err(e) => {
                warn!(
                    "{}: batch of {} lifelogs rejected by {}: {}",
                    self.sink_id,
                    records.len(),
                    self.sink.name(),
                    e
                );
                let cause = e.to_string();
                report.failed = ordered.into_iter().map(|r| (r.id, cause.clone())).collect();
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sinks::DeliveryReceipt;
    use crate::storage::InMemoryWatermarkStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Sink that fails for chosen ids and records every call
    struct FakeSink {
        failing: HashSet<String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeSink {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Sink for FakeSink {
        fn name(&self) -> &str {
            "fake"
        }

        fn deliver(&self, records: &[LifelogRecord]) -> Result<DeliveryReceipt, SinkError> {
            let ids: Vec<String> = records.iter().map(|r| r.id.as_str().to_string()).collect();
            self.calls.lock().unwrap().push(ids.clone());
            if ids.iter().any(|id| self.failing.contains(id)) {
                return Err(SinkError::Rejected {
                    status: 500,
                    body: "nope".to_string(),
                });
            }
            Ok(DeliveryReceipt::default())
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn record(id: &str, end_hour: u32) -> LifelogRecord {
        LifelogRecord::builder(id, format!("2025-03-01T{:02}:00:00Z", end_hour)).build()
    }

    /// Oldest first: A(10), B(11), C(12)
    fn records() -> Vec<LifelogRecord> {
        vec![record("A", 10), record("B", 11), record("C", 12)]
    }

    fn sink_id() -> SinkId {
        SinkId::new("test").unwrap()
    }

    fn delivered(report: &DispatchReport) -> Vec<&str> {
        report.delivered.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_per_record_all_succeed() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let start = Watermark::new("", at(9));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        assert_eq!(delivered(&report), vec!["A", "B", "C"]);
        assert_eq!(report.watermark, Watermark::new("C", at(12)));
        assert_eq!(store.load(&id).unwrap(), Some(Watermark::new("C", at(12))));
        assert_eq!(sink.calls().len(), 3);
    }

    #[test]
    fn test_per_record_skips_failure_and_holds_watermark() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&["B"]);
        let id = sink_id();
        let start = Watermark::new("", at(9));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        // C is still attempted after B fails
        assert_eq!(delivered(&report), vec!["A", "C"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "B");
        // Watermark stops before the failed record
        assert_eq!(report.watermark, Watermark::new("A", at(10)));
        assert_eq!(store.load(&id).unwrap(), Some(Watermark::new("A", at(10))));
    }

    #[test]
    fn test_per_record_first_failure_leaves_watermark_untouched() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&["A"]);
        let id = sink_id();
        let start = Watermark::new("", at(9));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        assert_eq!(delivered(&report), vec!["B", "C"]);
        assert_eq!(report.watermark, start);
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn test_per_record_newest_first_order() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let start = Watermark::new("", at(9));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .with_order(DeliveryOrder::NewestFirst)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        assert_eq!(delivered(&report), vec!["C", "B", "A"]);
        assert_eq!(report.watermark, Watermark::new("C", at(12)));
    }

    #[test]
    fn test_per_record_newest_first_with_old_failure() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&["A"]);
        let id = sink_id();
        let start = Watermark::new("Z", at(9));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .with_order(DeliveryOrder::NewestFirst)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        assert_eq!(delivered(&report), vec!["C", "B"]);
        assert_eq!(report.watermark, start);
    }

    #[test]
    fn test_batch_success_advances_to_newest() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let start = Watermark::new("A", at(10));
        let batch = vec![record("B", 11), record("C", 12)];

        let report = SinkDispatcher::new(&id, &sink, &store)
            .with_mode(DeliveryMode::Batch)
            .dispatch(&batch, &start, &CancelToken::new())
            .unwrap();

        assert_eq!(sink.calls(), vec![vec!["B".to_string(), "C".to_string()]]);
        assert_eq!(report.watermark, Watermark::new("C", at(12)));
        assert_eq!(store.load(&id).unwrap(), Some(Watermark::new("C", at(12))));
    }

    #[test]
    fn test_batch_newest_first_payload_order() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let start = Watermark::new("A", at(10));
        let batch = vec![record("B", 11), record("C", 12)];

        let report = SinkDispatcher::new(&id, &sink, &store)
            .with_mode(DeliveryMode::Batch)
            .with_order(DeliveryOrder::NewestFirst)
            .dispatch(&batch, &start, &CancelToken::new())
            .unwrap();

        assert_eq!(sink.calls(), vec![vec!["C".to_string(), "B".to_string()]]);
        assert_eq!(report.watermark, Watermark::new("C", at(12)));
    }

    #[test]
    fn test_batch_failure_is_all_or_nothing() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&["C"]);
        let id = sink_id();
        let start = Watermark::new("A", at(10));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .with_mode(DeliveryMode::Batch)
            .dispatch(&records(), &start, &CancelToken::new())
            .unwrap();

        assert!(report.delivered.is_empty());
        assert_eq!(report.failed.len(), 3);
        assert_eq!(report.watermark, start);
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn test_empty_dispatch_makes_no_calls() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let start = Watermark::new("A", at(10));

        let report = SinkDispatcher::new(&id, &sink, &store)
            .dispatch(&[], &start, &CancelToken::new())
            .unwrap();

        assert!(sink.calls().is_empty());
        assert_eq!(report.watermark, start);
    }

    #[test]
    fn test_cancel_stops_per_record_dispatch() {
        let store = InMemoryWatermarkStore::new();
        let sink = FakeSink::new(&[]);
        let id = sink_id();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = SinkDispatcher::new(&id, &sink, &store)
            .dispatch(&records(), &Watermark::new("", at(9)), &cancel)
            .unwrap();

        assert!(report.cancelled);
        assert!(sink.calls().is_empty());
        assert!(store.load(&id).unwrap().is_none());
    }
}
