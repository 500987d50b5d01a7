//! Configuration for the attribution relay
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)

use crate::error::{RelayError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub clickhouse: ClickHouseConfig,
    pub watermark: WatermarkConfig,
    pub cache: CacheConfig,
    pub tracker: TrackerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
    /// Value of `media_source` the relay cares about
    pub media_source: String,
    /// Column holding the time a row landed in the warehouse
    pub inserted_at_column: String,
    pub query_timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            username: "default".to_string(),
            password: String::new(),
            database: "analytics".to_string(),
            table: "appsflyer_export".to_string(),
            media_source: "Popunder".to_string(),
            inserted_at_column: "inserted_at".to_string(),
            query_timeout: Duration::from_secs(60),
        }
    }
}

/// How "new since last run" is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkMode {
    /// Compare the matching row count with the previous run
    #[default]
    RowCount,
    /// Fetch rows inserted into the warehouse after the last seen insertion time
    InsertedAt,
}

impl FromStr for WatermarkMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row_count" | "count" => Ok(WatermarkMode::RowCount),
            "inserted_at" | "timestamp" => Ok(WatermarkMode::InsertedAt),
            other => Err(RelayError::Config(format!(
                "RELAY_WATERMARK_MODE must be row_count or inserted_at, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    pub mode: WatermarkMode,
    pub path: PathBuf,
    /// Insertion-time mode only: how far back the very first run looks
    pub initial_lookback: Duration,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            mode: WatermarkMode::RowCount,
            path: PathBuf::from("var_storage.json"),
            initial_lookback: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db/cache.db"),
            busy_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maintracking.net/cikpl9k.php".to_string(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 10,
            retry_delay: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Send `trial_started` as soon as a trial shows up instead of waiting
    /// for it to settle. The settled confirmation is sent either way.
    pub forward_trial_start: bool,
    /// Age after which a pending trial is considered settled
    pub confirmation_delay: Duration,
    /// Cache rows older than this are pruned at the end of every run
    pub retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forward_trial_start: false,
            confirmation_delay: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub debug: bool,
    pub json: bool,
}

impl LoggingConfig {
    /// Logging settings alone, so tracing can be set up before the rest is validated.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            debug: parse_env("RELAY_DEBUG", false)?,
            json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let clickhouse = ClickHouseConfig {
            url: env::var("CLICKHOUSE_URL")
                .map_err(|_| RelayError::Config("CLICKHOUSE_URL must be set".to_string()))?,
            username: env::var("CLICKHOUSE_USER").unwrap_or(defaults.clickhouse.username),
            password: env::var("CLICKHOUSE_PASSWORD").unwrap_or_default(),
            database: env::var("CLICKHOUSE_DATABASE").unwrap_or(defaults.clickhouse.database),
            table: env::var("CLICKHOUSE_TABLE").unwrap_or(defaults.clickhouse.table),
            media_source: env::var("RELAY_MEDIA_SOURCE")
                .unwrap_or(defaults.clickhouse.media_source),
            inserted_at_column: column_name(
                "CLICKHOUSE_INSERTED_AT_COLUMN",
                env::var("CLICKHOUSE_INSERTED_AT_COLUMN")
                    .unwrap_or(defaults.clickhouse.inserted_at_column),
            )?,
            query_timeout: Duration::from_secs(parse_env(
                "CLICKHOUSE_QUERY_TIMEOUT_SECS",
                defaults.clickhouse.query_timeout.as_secs(),
            )?),
        };

        let watermark = WatermarkConfig {
            mode: match env::var("RELAY_WATERMARK_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.watermark.mode,
            },
            path: env::var("RELAY_WATERMARK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.watermark.path),
            initial_lookback: Duration::from_secs(parse_env(
                "RELAY_INITIAL_LOOKBACK_SECS",
                defaults.watermark.initial_lookback.as_secs(),
            )?),
        };

        let cache = CacheConfig {
            db_path: env::var("RELAY_CACHE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache.db_path),
            busy_timeout: defaults.cache.busy_timeout,
        };

        let tracker = TrackerConfig {
            base_url: env::var("TRACKER_BASE_URL").unwrap_or(defaults.tracker.base_url),
            request_timeout: Duration::from_secs(parse_env(
                "TRACKER_REQUEST_TIMEOUT_SECS",
                defaults.tracker.request_timeout.as_secs(),
            )?),
            max_attempts: parse_env("TRACKER_RETRIES", defaults.tracker.max_attempts)?,
            retry_delay: Duration::from_secs(parse_env(
                "TRACKER_RETRY_DELAY_SECS",
                defaults.tracker.retry_delay.as_secs(),
            )?),
        };

        let retention_days: u64 = parse_env("RELAY_CACHE_RETENTION_DAYS", 7)?;
        let pipeline = PipelineConfig {
            forward_trial_start: parse_env(
                "RELAY_FORWARD_TRIAL_START",
                defaults.pipeline.forward_trial_start,
            )?,
            confirmation_delay: Duration::from_secs(parse_env(
                "RELAY_CONFIRMATION_DELAY_SECS",
                defaults.pipeline.confirmation_delay.as_secs(),
            )?),
            retention: days(retention_days).ok_or_else(|| {
                RelayError::Config(format!(
                    "RELAY_CACHE_RETENTION_DAYS is out of range: {retention_days}"
                ))
            })?,
        };

        Ok(Self {
            clickhouse,
            watermark,
            cache,
            tracker,
            pipeline,
        })
    }

    /// Log the effective configuration without credentials.
    pub fn log_config(&self) {
        info!(
            clickhouse_url = %self.clickhouse.url,
            database = %self.clickhouse.database,
            table = %self.clickhouse.table,
            media_source = %self.clickhouse.media_source,
            watermark_mode = ?self.watermark.mode,
            watermark_path = %self.watermark.path.display(),
            cache_db = %self.cache.db_path.display(),
            tracker_url = %self.tracker.base_url,
            tracker_attempts = self.tracker.max_attempts,
            tracker_retry_delay_secs = self.tracker.retry_delay.as_secs(),
            inserted_at_column = %self.clickhouse.inserted_at_column,
            "Relay configuration loaded"
        );
    }
}

fn days(n: u64) -> Option<Duration> {
    n.checked_mul(24 * 60 * 60).map(Duration::from_secs)
}

/// The column name is inlined into SQL, so only plain identifiers are accepted.
fn column_name(key: &str, raw: String) -> Result<String> {
    let valid = !raw.is_empty()
        && !raw.starts_with(|c: char| c.is_ascii_digit())
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(raw)
    } else {
        Err(RelayError::Config(format!(
            "{key} must be a plain column name, got {raw:?}"
        )))
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
