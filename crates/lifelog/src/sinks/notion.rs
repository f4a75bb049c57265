//! Notion database sink
//!
//! Creates one database page per lifelog with typed properties.

use log::{debug, info};
use serde_json::{Value, json};
use std::sync::Arc;

use super::{DeliveryReceipt, Sink};
use crate::error::SinkError;
use crate::http::{HttpRequest, HttpTransport};
use crate::models::LifelogRecord;

/// Structured record store sink
pub struct NotionSink {
    transport: Arc<dyn HttpTransport>,
    api_key: String,
    database_id: String,
    pages_url: String,
}

impl NotionSink {
    /// Page creation endpoint
    pub const PAGES_URL: &'static str = "https://api.notion.com/v1/pages";

    /// API version header value
    pub const API_VERSION: &'static str = "2022-06-28";

    /// Maximum characters of a rich text property
    pub const CONTENT_LIMIT: usize = 2000;

    /// Value of the `Source` select property
    pub const SOURCE_TAG: &'static str = "Limitless";

    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_key: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            database_id: database_id.into(),
            pages_url: Self::PAGES_URL.to_string(),
        }
    }

    pub fn with_pages_url(mut self, url: impl Into<String>) -> Self {
        self.pages_url = url.into();
        self
    }

    /// Build the page creation body for one lifelog
    pub fn page_payload(&self, record: &LifelogRecord) -> Value {
        let content: String = record.markdown.chars().take(Self::CONTENT_LIMIT).collect();

        let mut properties = json!({
            "Name": {
                "title": [{"text": {"content": record.title}}]
            },
            "Content": {
                "rich_text": [{"text": {"content": content}}]
            },
            "End Time": {
                "date": {"start": record.end_time.raw}
            },
            "Source": {
                "select": {"name": Self::SOURCE_TAG}
            }
        });

        if let Some(start) = &record.start_time {
            properties["Start Time"] = json!({"date": {"start": start.raw}});
        }

        json!({
            "parent": {"database_id": self.database_id},
            "properties": properties
        })
    }

    fn create_page(&self, record: &LifelogRecord) -> Result<Option<String>, SinkError> {
        let request = HttpRequest::post_json(self.pages_url.as_str(), self.page_payload(record))
            .bearer(&self.api_key)
            .header("Notion-Version", Self::API_VERSION);

        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(SinkError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let page_id = response
            .json::<Value>()
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
        info!("Added Notion page for lifelog {}: {}", record.id, record.title);
        Ok(page_id)
    }
}

impl Sink for NotionSink {
    fn name(&self) -> &str {
        "notion"
    }

    /// Creates one page per record, stopping at the first rejection
    fn deliver(&self, records: &[LifelogRecord]) -> Result<DeliveryReceipt, SinkError> {
        if records.is_empty() {
            return Err(SinkError::Empty);
        }

        let mut reference = None;
        for record in records {
            debug!("Creating Notion page for lifelog {}", record.id);
            reference = self.create_page(record)?;
        }
        Ok(DeliveryReceipt { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::HttpResponse;
    use std::sync::Mutex;

    struct RecordingTransport {
        status: u16,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl HttpTransport for RecordingTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(HttpResponse::new(self.status, r#"{"id": "page-1"}"#))
        }
    }

    fn transport(status: u16) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            status,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn record() -> LifelogRecord {
        LifelogRecord::builder("abc", "2025-03-01T09:15:00-05:00")
            .title("Standup")
            .markdown("notes")
            .start_time("2025-03-01T09:00:00-05:00")
            .build()
    }

    #[test]
    fn test_payload_shape() {
        let sink = NotionSink::new(transport(200), "key", "db-1");
        let payload = sink.page_payload(&record());

        assert_eq!(payload["parent"]["database_id"], "db-1");
        let props = &payload["properties"];
        assert_eq!(props["Name"]["title"][0]["text"]["content"], "Standup");
        assert_eq!(props["Content"]["rich_text"][0]["text"]["content"], "notes");
        assert_eq!(props["Start Time"]["date"]["start"], "2025-03-01T09:00:00-05:00");
        assert_eq!(props["End Time"]["date"]["start"], "2025-03-01T09:15:00-05:00");
        assert_eq!(props["Source"]["select"]["name"], "Limitless");
    }

    #[test]
    fn test_content_capped_by_characters() {
        let sink = NotionSink::new(transport(200), "key", "db-1");
        let long = LifelogRecord::builder("abc", "2025-03-01T09:15:00Z")
            .markdown("é".repeat(2500))
            .build();

        let payload = sink.page_payload(&long);
        let content = payload["properties"]["Content"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(content.chars().count(), NotionSink::CONTENT_LIMIT);
        assert!(payload["properties"].get("Start Time").is_none());
    }

    #[test]
    fn test_deliver_sends_headers() {
        let transport = transport(200);
        let sink = NotionSink::new(transport.clone(), "secret", "db-1");

        let receipt = sink.deliver(&[record()]).unwrap();

        assert_eq!(receipt.reference.as_deref(), Some("page-1"));
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, NotionSink::PAGES_URL);
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer secret"));
        assert_eq!(requests[0].header_value("Notion-Version"), Some("2022-06-28"));
    }

    #[test]
    fn test_non_2xx_is_rejection() {
        let sink = NotionSink::new(transport(400), "key", "db-1");
        let err = sink.deliver(&[record()]).unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status: 400, .. }));
    }
}
