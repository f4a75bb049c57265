//! Limitless API HTTP client
//!
//! Provides cursor-paginated retrieval of lifelogs with bounded retry on
//! transient upstream failures.

use chrono::NaiveDate;
use log::{debug, error, info};
use std::sync::Arc;

use super::api::ListLifelogsResponse;
use super::normalize::normalize_lifelog;
use super::retry::{RetryError, RetryPolicy, Verdict};
use crate::clock::{CancelToken, Clock};
use crate::error::{FetchError, TransientFailure, TransportError};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::models::LifelogRecord;

/// Order in which upstream returns lifelogs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first
    #[default]
    Asc,
    /// Newest first
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Parameters for one fetch session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Calendar date to list, in `timezone`; `None` lets upstream decide
    pub date: Option<NaiveDate>,
    pub direction: Direction,
    /// IANA timezone name sent to upstream
    pub timezone: Option<String>,
    /// Stop after this many records; `None` pages until the end of data
    pub limit: Option<usize>,
    /// Page size requested per call
    pub batch_size: usize,
    pub include_markdown: bool,
    pub include_headings: bool,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            date: None,
            direction: Direction::Asc,
            timezone: None,
            limit: None,
            batch_size: 10,
            include_markdown: true,
            include_headings: false,
        }
    }
}

/// One page of validated lifelogs
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<LifelogRecord>,
    /// Items upstream sent that failed validation
    pub rejected: usize,
    pub next_cursor: Option<String>,
}

/// Failure of a single HTTP attempt, before retry classification
#[derive(Debug)]
enum AttemptError {
    Transport(TransportError),
    Status { status: u16, body: String },
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "{}", e),
            AttemptError::Status { status, .. } => write!(f, "HTTP {}", status),
        }
    }
}

/// Limitless API client for fetching lifelogs
pub struct LifelogClient {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    api_key: String,
    base_url: String,
    endpoint: String,
    retry: RetryPolicy,
    transient_statuses: Vec<u16>,
}

impl LifelogClient {
    /// Limitless API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.limitless.ai";

    /// Lifelog listing endpoint, relative to the base URL
    pub const DEFAULT_ENDPOINT: &'static str = "v1/lifelogs";

    /// Statuses treated as transient by default (gateway timeout)
    pub const DEFAULT_TRANSIENT_STATUSES: &'static [u16] = &[504];

    /// Create a new client with default endpoint and retry policy
    pub fn new(
        api_key: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            clock,
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            transient_statuses: Self::DEFAULT_TRANSIENT_STATUSES.to_vec(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transient_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.transient_statuses = statuses.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    /// Start a lazy, page-by-page fetch session
    ///
    /// Each call starts again from the first page.
    pub fn pages(&self, request: FetchRequest, cancel: CancelToken) -> LifelogPages<'_> {
        LifelogPages {
            client: self,
            request,
            cancel,
            cursor: None,
            fetched: 0,
            done: false,
        }
    }

    /// Fetch every lifelog matching `request`
    ///
    /// Fails as a whole if any page fails: callers never see a partial
    /// result.
    pub fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<LifelogRecord>, FetchError> {
        let mut all_records = Vec::new();
        let mut rejected = 0;

        for page in self.pages(request.clone(), cancel.clone()) {
            let page = page?;
            rejected += page.rejected;
            all_records.extend(page.records);
        }

        info!(
            "Fetched {} lifelogs (date: {}, direction: {}, rejected: {})",
            all_records.len(),
            request
                .date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "any".to_string()),
            request.direction.as_str(),
            rejected
        );

        Ok(all_records)
    }

    /// Fetch a single page, retrying transient failures
    fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: usize,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ListLifelogsResponse, FetchError> {
        let mut http_request = HttpRequest::get(self.url())
            .header("X-API-Key", self.api_key.as_str())
            .query("limit", page_size.to_string())
            .query("includeMarkdown", request.include_markdown.to_string())
            .query("includeHeadings", request.include_headings.to_string())
            .query("direction", request.direction.as_str());

        if let Some(date) = request.date {
            http_request = http_request.query("date", date.format("%Y-%m-%d").to_string());
        }
        if let Some(timezone) = &request.timezone {
            http_request = http_request.query("timezone", timezone.as_str());
        }
        if let Some(cursor) = cursor {
            http_request = http_request.query("cursor", cursor);
        }

        let result = self.retry.run(
            self.clock.as_ref(),
            cancel,
            |attempt| {
                debug!("GET {} (attempt {})", http_request.url, attempt);
                let response = self
                    .transport
                    .send(&http_request)
                    .map_err(AttemptError::Transport)?;
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(AttemptError::Status {
                        status: response.status,
                        body: response.body,
                    })
                }
            },
            |err| match err {
                AttemptError::Transport(_) => Verdict::Retry,
                AttemptError::Status { status, .. } if self.transient_statuses.contains(status) => {
                    Verdict::Retry
                }
                AttemptError::Status { .. } => Verdict::Fail,
            },
        );

        let response: HttpResponse = match result {
            Ok(response) => response,
            Err(RetryError::Cancelled) => return Err(FetchError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                let last = match last {
                    AttemptError::Transport(e) => TransientFailure::Transport(e),
                    AttemptError::Status { status, .. } => TransientFailure::Status(status),
                };
                return Err(FetchError::UpstreamUnavailable { attempts, last });
            }
            Err(RetryError::Fatal(AttemptError::Status { status, body })) => {
                return Err(FetchError::UpstreamRequest { status, body });
            }
            Err(RetryError::Fatal(AttemptError::Transport(e))) => {
                return Err(FetchError::UpstreamUnavailable {
                    attempts: 1,
                    last: TransientFailure::Transport(e),
                });
            }
        };

        response
            .json()
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))
    }
}

/// Lazy iterator over pages of one fetch session
///
/// Yields at most one error, after which it is exhausted.
pub struct LifelogPages<'a> {
    client: &'a LifelogClient,
    request: FetchRequest,
    cancel: CancelToken,
    cursor: Option<String>,
    fetched: usize,
    done: bool,
}

impl LifelogPages<'_> {
    fn remaining(&self) -> Option<usize> {
        self.request
            .limit
            .map(|limit| limit.saturating_sub(self.fetched))
    }
}

impl Iterator for LifelogPages<'_> {
    type Item = Result<Page, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(FetchError::Cancelled));
        }

        let batch_size = self.request.batch_size.max(1);
        let page_size = match self.remaining() {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(remaining) => batch_size.min(remaining),
            None => batch_size,
        };

        let response = match self.client.fetch_page(
            &self.request,
            page_size,
            self.cursor.as_deref(),
            &self.cancel,
        ) {
            Ok(response) => response,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let raw_count = response.data.lifelogs.len();
        let mut records = Vec::with_capacity(raw_count);
        let mut rejected = 0;

        for item in response.data.lifelogs {
            match normalize_lifelog(item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Rejected lifelog from upstream: {}", e);
                    rejected += 1;
                }
            }
        }

        if let Some(remaining) = self.remaining() {
            records.truncate(remaining);
        }
        self.fetched += records.len();

        let next_cursor = response
            .meta
            .lifelogs
            .next_cursor
            .filter(|c| !c.is_empty());

        let limit_reached = self.remaining() == Some(0);
        let short_page = raw_count < page_size;

        if next_cursor.is_none() || short_page || limit_reached {
            self.done = true;
        } else {
            debug!(
                "Fetched {} lifelogs, next cursor: {:?}",
                records.len(),
                next_cursor
            );
        }
        self.cursor = next_cursor.clone();

        Some(Ok(Page {
            records,
            rejected,
            next_cursor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport that replays canned responses and records requests
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(504, "script exhausted")))
        }
    }

    fn page(ids: &[&str], next_cursor: Option<&str>) -> Result<HttpResponse, TransportError> {
        let lifelogs: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "title": id, "endTime": "2025-03-01T10:00:00Z"}))
            .collect();
        let body = json!({
            "data": {"lifelogs": lifelogs},
            "meta": {"lifelogs": {"nextCursor": next_cursor}}
        });
        Ok(HttpResponse::new(200, body.to_string()))
    }

    fn ids(n: usize, prefix: &str) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn client(transport: Arc<ScriptedTransport>, clock: Arc<ManualClock>) -> LifelogClient {
        LifelogClient::new("key", transport, clock)
            .with_base_url("https://upstream.test/")
            .with_retry(RetryPolicy::new(3, Duration::from_secs(5)))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_single_short_page() {
        let transport = ScriptedTransport::new(vec![page(&["a", "b"], Some("next"))]);
        let client = client(transport.clone(), clock());

        let records = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 2);
        // Short page ends pagination even with a cursor
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_request_shape() {
        let transport = ScriptedTransport::new(vec![page(&[], None)]);
        let client = client(transport.clone(), clock());
        let request = FetchRequest {
            date: NaiveDate::from_ymd_opt(2025, 3, 1),
            direction: Direction::Desc,
            timezone: Some("America/New_York".to_string()),
            ..FetchRequest::default()
        };

        client.fetch(&request, &CancelToken::new()).unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://upstream.test/v1/lifelogs");
        assert_eq!(sent.header_value("X-API-Key"), Some("key"));
        assert_eq!(sent.query_value("limit"), Some("10"));
        assert_eq!(sent.query_value("date"), Some("2025-03-01"));
        assert_eq!(sent.query_value("direction"), Some("desc"));
        assert_eq!(sent.query_value("timezone"), Some("America/New_York"));
        assert_eq!(sent.query_value("includeMarkdown"), Some("true"));
        assert_eq!(sent.query_value("includeHeadings"), Some("false"));
        assert_eq!(sent.query_value("cursor"), None);
    }

    #[test]
    fn test_follows_cursor_until_missing() {
        let first = ids(10, "a");
        let second = ids(10, "b");
        let first: Vec<&str> = first.iter().map(String::as_str).collect();
        let second: Vec<&str> = second.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![
            page(&first, Some("c1")),
            page(&second, Some("c2")),
            page(&["z"], None),
        ]);
        let client = client(transport.clone(), clock());

        let records = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 21);
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].query_value("cursor"), Some("c1"));
        assert_eq!(requests[2].query_value("cursor"), Some("c2"));
    }

    #[test]
    fn test_stops_without_cursor_on_full_page() {
        let full = ids(10, "a");
        let full: Vec<&str> = full.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![page(&full, None)]);
        let client = client(transport.clone(), clock());

        let records = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 10);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_truncates_to_limit() {
        let full = ids(10, "a");
        let full: Vec<&str> = full.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![page(&full, Some("c1"))]);
        let client = client(transport.clone(), clock());
        let request = FetchRequest {
            limit: Some(5),
            batch_size: 10,
            ..FetchRequest::default()
        };

        let records = client.fetch(&request, &CancelToken::new()).unwrap();

        assert_eq!(records.len(), 5);
        assert_eq!(records[4].id.as_str(), "a4");
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].query_value("limit"), Some("5"));
    }

    #[test]
    fn test_last_page_sized_to_remaining_limit() {
        let first = ids(4, "a");
        let first: Vec<&str> = first.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![
            page(&first, Some("c1")),
            page(&["b0", "b1"], Some("c2")),
        ]);
        let client = client(transport.clone(), clock());
        let request = FetchRequest {
            limit: Some(6),
            batch_size: 4,
            ..FetchRequest::default()
        };

        let records = client.fetch(&request, &CancelToken::new()).unwrap();

        assert_eq!(records.len(), 6);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].query_value("limit"), Some("2"));
    }

    #[test]
    fn test_retries_gateway_timeout() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(504, "")),
            Err(TransportError::Timeout("read timed out".to_string())),
            page(&["a"], None),
        ]);
        let clock = clock();
        let client = client(transport.clone(), clock.clone());

        let records = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_retry_bound_on_persistent_504() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone(), clock());

        let err = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap_err();

        assert_eq!(transport.requests().len(), 4);
        match err {
            FetchError::UpstreamUnavailable { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(last, TransientFailure::Status(504)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_transient_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(401, "bad key"))]);
        let client = client(transport.clone(), clock());

        let err = client
            .fetch(&FetchRequest::default(), &CancelToken::new())
            .unwrap_err();

        assert_eq!(transport.requests().len(), 1);
        assert!(matches!(
            err,
            FetchError::UpstreamRequest { status: 401, .. }
        ));
    }

    #[test]
    fn test_later_page_failure_fails_whole_fetch() {
        let full = ids(10, "a");
        let full: Vec<&str> = full.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![
            page(&full, Some("c1")),
            Ok(HttpResponse::new(500, "boom")),
        ]);
        let client = client(transport.clone(), clock());

        let result = client.fetch(&FetchRequest::default(), &CancelToken::new());

        assert!(matches!(
            result,
            Err(FetchError::UpstreamRequest { status: 500, .. })
        ));
    }

    #[test]
    fn test_malformed_body() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "<html>"))]);
        let client = client(transport, clock());

        let result = client.fetch(&FetchRequest::default(), &CancelToken::new());

        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_invalid_items_rejected_but_page_kept() {
        let body = json!({
            "data": {"lifelogs": [
                {"id": "a", "endTime": "2025-03-01T10:00:00Z"},
                {"title": "no id", "endTime": "2025-03-01T10:00:00Z"},
                {"id": "c"}
            ]},
            "meta": {"lifelogs": {"nextCursor": null}}
        });
        let transport =
            ScriptedTransport::new(vec![Ok(HttpResponse::new(200, body.to_string()))]);
        let client = client(transport, clock());

        let pages: Vec<Page> = client
            .pages(FetchRequest::default(), CancelToken::new())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].records.len(), 1);
        assert_eq!(pages[0].rejected, 2);
    }

    #[test]
    fn test_cancelled_before_first_page() {
        let transport = ScriptedTransport::new(vec![page(&["a"], None)]);
        let client = client(transport.clone(), clock());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = client.fetch(&FetchRequest::default(), &cancel);

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_pages_is_lazy() {
        let full = ids(10, "a");
        let full: Vec<&str> = full.iter().map(String::as_str).collect();
        let transport = ScriptedTransport::new(vec![page(&full, Some("c1")), page(&["b"], None)]);
        let client = client(transport.clone(), clock());

        let mut pages = client.pages(FetchRequest::default(), CancelToken::new());
        assert!(transport.requests().is_empty());

        let first = pages.next().unwrap().unwrap();
        assert_eq!(first.records.len(), 10);
        assert_eq!(transport.requests().len(), 1);

        let second = pages.next().unwrap().unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(pages.next().is_none());
    }
}
