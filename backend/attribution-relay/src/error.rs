use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ClickHouse error: {0}")]
    Warehouse(String),

    #[error("Cache error: {0}")]
    Cache(#[from] sqlx::Error),

    #[error("Cache migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Watermark I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watermark format error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl From<clickhouse::error::Error> for RelayError {
    fn from(err: clickhouse::error::Error) -> Self {
        RelayError::Warehouse(err.to_string())
    }
}

impl From<resilience::TimeoutError> for RelayError {
    fn from(err: resilience::TimeoutError) -> Self {
        RelayError::Warehouse(err.to_string())
    }
}
