//! Configuration loading for sync passes
//!
//! Settings are read from (later sources win):
//! 1. JSON file (~/.config/lifesync/lifesync.json), if present
//! 2. Environment variables
//!
//! Everything is validated before any network call is made.

use chrono::Duration;
use chrono_tz::Tz;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::http::{DEFAULT_TIMEOUT, HttpTransport};
use crate::limitless::{LifelogClient, RetryPolicy};
use crate::models::SinkId;
use crate::sinks::{MemSink, NotionSink, Sink};
use crate::storage::{FileWatermarkStore, WatermarkStore};
use crate::sync::{BoundaryFallback, DeliveryMode, DeliveryOrder, SinkProfile, SyncPass};

/// Config filename in the Lifesync config directory
pub const CONFIG_FILE: &str = "lifesync.json";

/// Timezone used when none is configured
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Upper bound for `lookback_minutes` and `max_catch_up_days`, in days
pub const MAX_HISTORY_DAYS: u32 = 365;

/// Overrides for a sink's profile; unset fields keep the sink's defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfileOverrides {
    pub lookback_minutes: Option<i64>,
    pub boundary_fallback: Option<BoundaryFallback>,
    pub delivery_mode: Option<DeliveryMode>,
    pub delivery_order: Option<DeliveryOrder>,
    pub batch_size: Option<usize>,
    pub max_catch_up_days: Option<u32>,
}

impl ProfileOverrides {
    fn apply(&self, mut profile: SinkProfile) -> Result<SinkProfile, ConfigError> {
        if let Some(minutes) = self.lookback_minutes {
            let limit = Duration::days(i64::from(MAX_HISTORY_DAYS));
            profile.lookback = Duration::try_minutes(minutes)
                .filter(|lookback| *lookback > Duration::zero() && *lookback <= limit)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "lookback_minutes",
                    reason: format!(
                        "must be between 1 and {} ({} days), got {}",
                        limit.num_minutes(),
                        MAX_HISTORY_DAYS,
                        minutes
                    ),
                })?;
        }
        if let Some(fallback) = self.boundary_fallback {
            profile.boundary_fallback = fallback;
        }
        if let Some(mode) = self.delivery_mode {
            profile.delivery_mode = mode;
        }
        if let Some(order) = self.delivery_order {
            profile.delivery_order = order;
        }
        if let Some(size) = self.batch_size {
            profile.batch_size = validate_batch_size(size)?;
        }
        if let Some(days) = self.max_catch_up_days {
            if days > MAX_HISTORY_DAYS {
                return Err(ConfigError::InvalidValue {
                    field: "max_catch_up_days",
                    reason: format!("must be at most {}, got {}", MAX_HISTORY_DAYS, days),
                });
            }
            profile.max_catch_up_days = days;
        }
        Ok(profile)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotionSection {
    pub api_key: Option<String>,
    pub database_id: Option<String>,
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub profile: ProfileOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemSection {
    pub api_key: Option<String>,
    pub collection: Option<String>,
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub profile: ProfileOverrides,
}

/// On-disk config file format; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub limitless_api_key: Option<String>,
    pub limitless_api_url: Option<String>,
    pub timezone: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub notion: NotionSection,
    pub mem: MemSection,
}

/// Destination of a configured sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    Notion { api_key: String, database_id: String },
    Mem { api_key: String, collection: String },
}

/// A sink enabled by configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub profile: SinkProfile,
}

/// Validated settings for a sync run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub limitless_api_key: String,
    pub limitless_api_url: Url,
    pub timezone: Tz,
    /// Directory holding one watermark file per sink
    pub state_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Per-call HTTP timeout
    pub timeout: std::time::Duration,
    pub sinks: Vec<SinkConfig>,
}

impl SyncConfig {
    /// Load settings from `path` (or the default config file when it
    /// exists), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                config::load_json_file(path).map_err(|e| ConfigError::Load(format!("{:#}", e)))?
            }
            None if config::config_exists(CONFIG_FILE) => {
                debug!("Loading config from default {}", CONFIG_FILE);
                config::load_json(CONFIG_FILE).map_err(|e| ConfigError::Load(format!("{:#}", e)))?
            }
            None => ConfigFile::default(),
        };

        Self::from_sources(file, |name| std::env::var(name).ok())
    }

    /// Parse a config file body and apply overrides from `env`
    pub fn from_json(
        json: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_sources(file, env)
    }

    /// Merge `file` with `env` lookups and validate the result
    pub fn from_sources(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Empty values count as unset
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let pick = |name: &str, fallback: &Option<String>| {
            env(name).or_else(|| fallback.clone().filter(|v| !v.trim().is_empty()))
        };

        let limitless_api_key = pick("LIMITLESS_API_KEY", &file.limitless_api_key)
            .ok_or(ConfigError::MissingCredential("LIMITLESS_API_KEY"))?;

        let raw_url = pick("LIMITLESS_API_URL", &file.limitless_api_url)
            .unwrap_or_else(|| LifelogClient::DEFAULT_BASE_URL.to_string());
        let limitless_api_url = parse_url("LIMITLESS_API_URL", &raw_url)?;

        let raw_tz = pick("LIFESYNC_TIMEZONE", &file.timezone)
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = raw_tz.parse().map_err(|_| ConfigError::InvalidValue {
            field: "LIFESYNC_TIMEZONE",
            reason: format!("unknown timezone {:?}", raw_tz),
        })?;

        let state_dir = env("LIFESYNC_STATE_DIR")
            .map(PathBuf::from)
            .or(file.state_dir)
            .or_else(config::state_dir)
            .ok_or(ConfigError::InvalidValue {
                field: "LIFESYNC_STATE_DIR",
                reason: "could not determine a state directory".to_string(),
            })?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            file.max_retries.unwrap_or(defaults.max_retries),
            file.retry_delay_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.delay),
        );
        let timeout = match file.timeout_secs {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "timeout_secs",
                    reason: "must be positive".to_string(),
                });
            }
            Some(secs) => std::time::Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };
        let batch_size = file.batch_size.map(validate_batch_size).transpose()?;

        let mut sinks = Vec::new();

        if file.notion.enabled != Some(false) {
            let api_key = pick("NOTION_API_KEY", &file.notion.api_key);
            let database_id = pick("NOTION_DATABASE_ID", &file.notion.database_id);
            match (api_key, database_id) {
                (Some(api_key), Some(database_id)) => {
                    let mut profile = SinkProfile::structured(sink_id("notion")?, timezone);
                    if let Some(size) = batch_size {
                        profile.batch_size = size;
                    }
                    sinks.push(SinkConfig {
                        kind: SinkKind::Notion {
                            api_key,
                            database_id,
                        },
                        profile: file.notion.profile.apply(profile)?,
                    });
                }
                (Some(_), None) => {
                    return Err(ConfigError::MissingCredential("NOTION_DATABASE_ID"));
                }
                (None, _) if file.notion.enabled == Some(true) => {
                    return Err(ConfigError::MissingCredential("NOTION_API_KEY"));
                }
                (None, _) => debug!("Notion sink not configured"),
            }
        }

        if file.mem.enabled != Some(false) {
            match pick("MEM_API_KEY", &file.mem.api_key) {
                Some(api_key) => {
                    let mut profile = SinkProfile::note(sink_id("mem")?, timezone);
                    if let Some(size) = batch_size {
                        profile.batch_size = size;
                    }
                    sinks.push(SinkConfig {
                        kind: SinkKind::Mem {
                            api_key,
                            collection: file
                                .mem
                                .collection
                                .clone()
                                .unwrap_or_else(|| MemSink::DEFAULT_COLLECTION.to_string()),
                        },
                        profile: file.mem.profile.apply(profile)?,
                    });
                }
                None if file.mem.enabled == Some(true) => {
                    return Err(ConfigError::MissingCredential("MEM_API_KEY"));
                }
                None => debug!("Mem sink not configured"),
            }
        }

        if sinks.is_empty() {
            return Err(ConfigError::NoSinks);
        }

        Ok(Self {
            limitless_api_key,
            limitless_api_url,
            timezone,
            state_dir,
            retry,
            timeout,
            sinks,
        })
    }

    /// Get the default config file path (~/.config/lifesync/lifesync.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }

    /// Configured sinks named in `names`, or all of them when `names` is empty
    pub fn select(&self, names: &[String]) -> Result<Vec<&SinkConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.sinks.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.sinks
                    .iter()
                    .find(|s| s.profile.id.as_str() == name)
                    .ok_or_else(|| ConfigError::UnknownSink(name.clone()))
            })
            .collect()
    }

    /// The file-backed watermark store under `state_dir`
    pub fn watermark_store(&self) -> FileWatermarkStore {
        FileWatermarkStore::new(&self.state_dir).with_naive_timezone(self.timezone)
    }

    /// Build one sync pass per selected sink, sharing a client and store
    pub fn build_passes(
        &self,
        names: &[String],
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn WatermarkStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Vec<SyncPass>, ConfigError> {
        let selected = self.select(names)?;

        let client = Arc::new(
            LifelogClient::new(&self.limitless_api_key, transport.clone(), clock.clone())
                .with_base_url(self.limitless_api_url.as_str())
                .with_retry(self.retry),
        );

        let passes = selected
            .into_iter()
            .map(|sink_config| {
                let sink: Arc<dyn Sink> = match &sink_config.kind {
                    SinkKind::Notion {
                        api_key,
                        database_id,
                    } => Arc::new(NotionSink::new(transport.clone(), api_key, database_id)),
                    SinkKind::Mem {
                        api_key,
                        collection,
                    } => Arc::new(
                        MemSink::new(transport.clone(), clock.clone(), api_key, self.timezone)
                            .with_collection(collection),
                    ),
                };
                info!("Configured sink {}", sink_config.profile.id);
                SyncPass::new(
                    sink_config.profile.clone(),
                    client.clone(),
                    store.clone(),
                    sink,
                    clock.clone(),
                )
            })
            .collect();

        Ok(passes)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: format!("{:?}: {}", raw, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    Ok(url)
}

fn validate_batch_size(size: usize) -> Result<usize, ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "batch_size",
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(size)
}

fn sink_id(name: &str) -> Result<SinkId, ConfigError> {
    SinkId::new(name).map_err(|e| ConfigError::InvalidValue {
        field: "sink",
        reason: e.to_string(),
    })
}
