//! Limitless API integration
//!
//! This module provides:
//! - Cursor-paginated lifelog client with bounded retry
//! - Standalone retry policy
//! - Validation of raw API items into domain records

mod client;
mod normalize;
mod retry;

pub use client::{Direction, FetchRequest, LifelogClient, LifelogPages, Page};
pub use normalize::{NormalizeError, normalize_lifelog};
pub use retry::{RetryError, RetryPolicy, Verdict};

/// Limitless API response types
pub mod api {
    use serde::Deserialize;

    /// Response from listing lifelogs
    #[derive(Debug, Default, Deserialize)]
    pub struct ListLifelogsResponse {
        #[serde(default)]
        pub data: LifelogsData,
        #[serde(default)]
        pub meta: ListMeta,
    }

    /// Items are kept as raw JSON so one malformed item does not sink the page
    #[derive(Debug, Default, Deserialize)]
    pub struct LifelogsData {
        #[serde(default)]
        pub lifelogs: Vec<serde_json::Value>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct ListMeta {
        #[serde(default)]
        pub lifelogs: CursorMeta,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CursorMeta {
        pub next_cursor: Option<String>,
    }

    /// A single lifelog as sent by the API
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawLifelog {
        pub id: Option<String>,
        pub title: Option<String>,
        pub markdown: Option<String>,
        pub start_time: Option<String>,
        pub end_time: Option<String>,
    }
}
