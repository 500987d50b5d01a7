/// SQLite-backed dedup cache.
///
/// Every event the relay has seen recently is recorded here, keyed by
/// `(subscriber_id, event_name)`. The table doubles as the queue of trials
/// waiting for their confirmation window to elapse.
use super::{decode_timestamp, encode_timestamp};
use crate::error::Result;
use crate::models::{AttributionEvent, CacheEntry, EventKind};
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub struct EventCache {
    pool: SqlitePool,
}

impl EventCache {
    /// Open (creating if needed) the cache database at `path` and apply the schema.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Cache database opened");
        Self::from_pool(pool).await
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection that is never recycled: each new connection
        // would see an empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        debug!("Cache schema is up to date");
        Ok(Self { pool })
    }

    /// Record an event unless its `(subscriber_id, event_name)` pair is already cached.
    ///
    /// Returns `true` when a new row was written.
    pub async fn insert_if_absent(
        &self,
        event: &AttributionEvent,
        inserted_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO event_cache (inserted_at, event_time, event_name, subscriber_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (subscriber_id, event_name) DO NOTHING
            "#,
        )
        .bind(encode_timestamp(inserted_at))
        .bind(encode_timestamp(event.event_time))
        .bind(event.kind.as_str())
        .bind(&event.subscriber_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                subscriber_id = %event.subscriber_id,
                event_name = %event.kind,
                "Record is already cached, skipping"
            );
            return Ok(false);
        }

        debug!(
            subscriber_id = %event.subscriber_id,
            event_name = %event.kind,
            "New record inserted into cache"
        );
        Ok(true)
    }

    pub async fn contains(&self, subscriber_id: &str, kind: EventKind) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM event_cache WHERE subscriber_id = ?1 AND event_name = ?2",
        )
        .bind(subscriber_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// Delete the `(subscriber_id, kind)` row. Returns the number of rows removed.
    pub async fn remove(&self, subscriber_id: &str, kind: EventKind) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM event_cache WHERE subscriber_id = ?1 AND event_name = ?2")
                .bind(subscriber_id)
                .bind(kind.as_str())
                .execute(&self.pool)
                .await?;

        debug!(
            subscriber_id = %subscriber_id,
            event_name = %kind,
            removed = result.rows_affected(),
            "Record removed from cache"
        );
        Ok(result.rows_affected())
    }

    /// Delete every row of a subscriber, whatever the event name.
    pub async fn remove_subscriber(&self, subscriber_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_cache WHERE subscriber_id = ?1")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;

        debug!(
            subscriber_id = %subscriber_id,
            removed = result.rows_affected(),
            "Subscriber removed from cache"
        );
        Ok(result.rows_affected())
    }

    /// Pending trials whose event_time is at or before `settled_before`, oldest first.
    ///
    /// A trial followed by a cached conversion or cancel of the same
    /// subscriber is over and never listed.
    pub async fn pending_trials(&self, settled_before: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, inserted_at, event_time, event_name, subscriber_id
            FROM event_cache AS trial
            WHERE trial.event_name = ?1
              AND trial.event_time <= ?2
              AND NOT EXISTS (
                  SELECT 1 FROM event_cache AS ended
                  WHERE ended.subscriber_id = trial.subscriber_id
                    AND ended.event_name IN (?3, ?4)
                    AND ended.event_time >= trial.event_time
              )
            ORDER BY trial.event_time ASC, trial.id ASC
            "#,
        )
        .bind(EventKind::TrialStart.as_str())
        .bind(encode_timestamp(settled_before))
        .bind(EventKind::Subscribe.as_str())
        .bind(EventKind::TrialCancel.as_str())
        .fetch_all(&self.pool)
        .await?;

        let entries = Self::parse_rows(rows)?;
        debug!(count = entries.len(), "Fetched settled trials");
        Ok(entries)
    }

    /// Delete rows whose event_time is strictly older than `cutoff`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_cache WHERE event_time < ?1")
            .bind(encode_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, inserted_at, event_time, event_name, subscriber_id
            FROM event_cache
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(self) {
        self.pool.close().await;
        debug!("Cache database closed");
    }

    fn parse_rows(rows: Vec<SqliteRow>) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let event_name: String = row.try_get("event_name")?;
            let Some(kind) = EventKind::from_event_name(&event_name) else {
                warn!(event_name = %event_name, "Unknown event name in cache, ignoring row");
                continue;
            };

            let inserted_at: String = row.try_get("inserted_at")?;
            let event_time: String = row.try_get("event_time")?;

            entries.push(CacheEntry {
                id: row.try_get("id")?,
                inserted_at: decode_timestamp(&inserted_at)?,
                event_time: decode_timestamp(&event_time)?,
                kind,
                subscriber_id: row.try_get("subscriber_id")?,
            });
        }
        Ok(entries)
    }
}
