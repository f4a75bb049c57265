//! Error types for the sync engine

use std::path::PathBuf;

/// Failure below the HTTP layer: no status code was received
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
}

/// The last transient failure seen before retries ran out
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransientFailure {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from fetching lifelogs upstream
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transient failures persisted past the retry budget
    #[error("upstream unavailable after {attempts} attempts: {last}")]
    UpstreamUnavailable { attempts: u32, last: TransientFailure },

    /// Upstream answered with a status that is not worth retrying
    #[error("upstream request failed with HTTP {status}: {body}")]
    UpstreamRequest { status: u16, body: String },

    /// Upstream answered 2xx with a body we cannot read
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Errors reading or writing persisted watermarks
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read watermark {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt watermark {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to write watermark {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors delivering to a sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected delivery with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("nothing to deliver")]
    Empty,
}

/// Invalid or missing configuration, detected before any network call
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("no sinks configured")]
    NoSinks,

    #[error("unknown sink {0:?}")]
    UnknownSink(String),
}

/// Errors that end a sync pass
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync pass cancelled")]
    Cancelled,
}

impl From<FetchError> for SyncError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        }
    }
}
