//! Warehouse access.
//!
//! The fetcher only needs three queries, so the warehouse sits behind a small
//! trait; `ClickHouseWarehouse` is the production implementation.

pub mod clickhouse_db;

pub use self::clickhouse_db::ClickHouseWarehouse;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Raw attribution row as exported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseRow {
    pub event_time: DateTime<Utc>,
    pub event_name: String,
    pub subscriber_id: String,
    /// When the row landed in the warehouse; only selected by `fetch_inserted_since`
    pub inserted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait EventWarehouse: Send + Sync {
    /// Number of rows matching the relay filter (media source + event names).
    async fn count_events(&self) -> Result<u64>;

    /// The `limit` newest matching rows, newest first.
    async fn fetch_latest(&self, limit: u64) -> Result<Vec<WarehouseRow>>;

    /// Matching rows inserted strictly after `after`, in insertion order.
    ///
    /// Late exports carry an old `event_time` but a fresh insertion time, so
    /// they are still picked up.
    async fn fetch_inserted_since(&self, after: DateTime<Utc>) -> Result<Vec<WarehouseRow>>;
}
