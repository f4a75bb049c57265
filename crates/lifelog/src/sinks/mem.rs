//! Mem note sink
//!
//! Concatenates lifelogs into a single markdown note per delivery.

use chrono::DateTime;
use chrono_tz::Tz;
use log::info;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{DeliveryReceipt, Sink};
use crate::clock::Clock;
use crate::error::SinkError;
use crate::http::{HttpRequest, HttpTransport};
use crate::models::{LifelogRecord, RecordTime};

/// Blob note store sink
pub struct MemSink {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    api_key: String,
    notes_url: String,
    collection: String,
    timezone: Tz,
}

impl MemSink {
    /// Note creation endpoint
    pub const NOTES_URL: &'static str = "https://api.mem.ai/v1/notes";

    /// Collection every note is filed under
    pub const DEFAULT_COLLECTION: &'static str = "Limitless Conversations";

    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        api_key: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            transport,
            clock,
            api_key: api_key.into(),
            notes_url: Self::NOTES_URL.to_string(),
            collection: Self::DEFAULT_COLLECTION.to_string(),
            timezone,
        }
    }

    pub fn with_notes_url(mut self, url: impl Into<String>) -> Self {
        self.notes_url = url.into();
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Render `records` as one markdown note
    pub fn render_note(&self, records: &[LifelogRecord]) -> String {
        let now = self.clock.now().with_timezone(&self.timezone);
        let mut note = format!("# {}: {}\n\n", self.collection, now.format("%Y-%m-%d %H:00"));

        for record in records {
            note.push_str(&format!("## {}\n\n", record.title));

            if let Some(start) = &record.start_time {
                match (clock_time(start), clock_time(&record.end_time)) {
                    (Some(from), Some(to)) => {
                        note.push_str(&format!("*Time: {} - {}*\n\n", from, to));
                    }
                    _ => note.push_str(&format!(
                        "*Start: {}*\n*End: {}*\n\n",
                        start.raw, record.end_time.raw
                    )),
                }
            }

            note.push_str(&format!("{}\n\n---\n\n", record.markdown));
        }

        note
    }

    /// Build the note creation body
    pub fn note_payload(&self, records: &[LifelogRecord]) -> Value {
        json!({
            "content": self.render_note(records),
            "add_to_collections": [self.collection],
            "created_at": self.clock.now().with_timezone(&self.timezone).to_rfc3339(),
        })
    }
}

/// `HH:MM` in the timestamp's own offset
fn clock_time(time: &RecordTime) -> Option<String> {
    DateTime::parse_from_rfc3339(time.raw.trim())
        .ok()
        .map(|dt| dt.format("%H:%M").to_string())
}

impl Sink for MemSink {
    fn name(&self) -> &str {
        "mem"
    }

    fn deliver(&self, records: &[LifelogRecord]) -> Result<DeliveryReceipt, SinkError> {
        if records.is_empty() {
            return Err(SinkError::Empty);
        }

        let request = HttpRequest::post_json(self.notes_url.as_str(), self.note_payload(records))
            .bearer(&self.api_key);

        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(SinkError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let url = response
            .json::<Value>()
            .ok()
            .and_then(|v| v.get("url").and_then(Value::as_str).map(str::to_string));
        info!(
            "Created Mem note with {} lifelogs: {}",
            records.len(),
            url.as_deref().unwrap_or("Unknown")
        );

        Ok(DeliveryReceipt { reference: url })
    }
}
