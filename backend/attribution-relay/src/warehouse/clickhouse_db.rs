// ============================================
// ClickHouse Warehouse Implementation
// ============================================
//
// Reads marketing-attribution rows from the AppsFlyer export table.
// Every query is bounded by the configured timeout; errors are not retried
// and end the run.

use super::{EventWarehouse, WarehouseRow};
use crate::config::ClickHouseConfig;
use crate::error::{RelayError, Result};
use crate::models::EventKind;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::{Client, Row};
use resilience::with_timeout;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct ClickHouseWarehouse {
    client: Client,
    table: String,
    media_source: String,
    inserted_at_column: String,
    query_timeout: Duration,
}

impl ClickHouseWarehouse {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.username)
            .with_password(&config.password);

        info!(
            url = %config.url,
            database = %config.database,
            table = %config.table,
            "ClickHouseWarehouse initialized"
        );

        Self {
            client,
            table: format!("{}.{}", config.database, config.table),
            media_source: config.media_source.clone(),
            inserted_at_column: config.inserted_at_column.clone(),
            query_timeout: config.query_timeout,
        }
    }

    /// `WHERE` clause shared by every query; `?` is the media source.
    fn filter_clause(&self) -> String {
        format!(
            "media_source = ? AND event_name IN ({})",
            event_name_list()
        )
    }

    /// Insertion time at millisecond precision, so rows landing within the
    /// same second as the watermark are not skipped.
    fn inserted_at_expr(&self) -> String {
        format!("toDateTime64({}, 3, 'UTC')", self.inserted_at_column)
    }
}

/// Quoted list of the event names the relay handles. The names are
/// compile-time constants, so inlining them is safe.
fn event_name_list() -> String {
    EventKind::ALL
        .iter()
        .map(|kind| format!("'{}'", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================
// ClickHouse Row Types
// ============================================

#[derive(Debug, Row, Deserialize)]
struct ExportRow {
    #[serde(with = "clickhouse::serde::time::datetime")]
    event_time: time::OffsetDateTime,
    event_name: String,
    af_sub1: String,
}

impl From<ExportRow> for WarehouseRow {
    fn from(row: ExportRow) -> Self {
        WarehouseRow {
            event_time: offset_datetime_to_chrono(row.event_time),
            event_name: row.event_name,
            subscriber_id: row.af_sub1,
            inserted_at: None,
        }
    }
}

#[derive(Debug, Row, Deserialize)]
struct InsertedExportRow {
    #[serde(with = "clickhouse::serde::time::datetime")]
    event_time: time::OffsetDateTime,
    event_name: String,
    af_sub1: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    inserted_at: time::OffsetDateTime,
}

impl From<InsertedExportRow> for WarehouseRow {
    fn from(row: InsertedExportRow) -> Self {
        WarehouseRow {
            event_time: offset_datetime_to_chrono(row.event_time),
            event_name: row.event_name,
            subscriber_id: row.af_sub1,
            inserted_at: Some(offset_datetime_to_chrono(row.inserted_at)),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    toDateTime(event_time) AS event_time,
    toString(event_name) AS event_name,
    ifNull(toString(af_sub1), '') AS af_sub1
"#;

#[async_trait]
impl EventWarehouse for ClickHouseWarehouse {
    async fn count_events(&self) -> Result<u64> {
        let query = format!(
            "SELECT count() FROM {} WHERE {}",
            self.table,
            self.filter_clause()
        );

        let count = with_timeout(
            self.query_timeout,
            self.client
                .query(&query)
                .bind(&self.media_source)
                .fetch_one::<u64>(),
        )
        .await?
        .map_err(|e| {
            error!(error = %e, "Failed to count attribution events");
            RelayError::from(e)
        })?;

        debug!(count, "Counted attribution events");
        Ok(count)
    }

    async fn fetch_latest(&self, limit: u64) -> Result<Vec<WarehouseRow>> {
        let query = format!(
            r#"
            SELECT {}
            FROM {}
            WHERE {}
            ORDER BY event_time DESC
            LIMIT ?
            "#,
            SELECT_COLUMNS,
            self.table,
            self.filter_clause()
        );

        let rows = with_timeout(
            self.query_timeout,
            self.client
                .query(&query)
                .bind(&self.media_source)
                .bind(limit)
                .fetch_all::<ExportRow>(),
        )
        .await?
        .map_err(|e| {
            error!(error = %e, limit, "Failed to fetch latest attribution events");
            RelayError::from(e)
        })?;

        debug!(count = rows.len(), "Fetched latest attribution events");
        Ok(rows.into_iter().map(WarehouseRow::from).collect())
    }

    async fn fetch_inserted_since(&self, after: DateTime<Utc>) -> Result<Vec<WarehouseRow>> {
        let query = format!(
            r#"
            SELECT {}, {inserted} AS inserted_at
            FROM {}
            WHERE {}
              AND {inserted} > fromUnixTimestamp64Milli(toInt64(?), 'UTC')
            ORDER BY inserted_at ASC, event_time ASC
            "#,
            SELECT_COLUMNS,
            self.table,
            self.filter_clause(),
            inserted = self.inserted_at_expr(),
        );

        let rows = with_timeout(
            self.query_timeout,
            self.client
                .query(&query)
                .bind(&self.media_source)
                .bind(after.timestamp_millis())
                .fetch_all::<InsertedExportRow>(),
        )
        .await?
        .map_err(|e| {
            error!(error = %e, after = %after, "Failed to fetch attribution events");
            RelayError::from(e)
        })?;

        debug!(count = rows.len(), after = %after, "Fetched attribution events inserted since watermark");
        Ok(rows.into_iter().map(WarehouseRow::from).collect())
    }
}

fn offset_datetime_to_chrono(dt: time::OffsetDateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond())
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
