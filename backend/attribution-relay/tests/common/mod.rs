// Shared fixtures for the relay integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use attribution_relay::clock::FixedClock;
use attribution_relay::config::{Config, TrackerConfig, WatermarkConfig, WatermarkMode};
use attribution_relay::error::{RelayError, Result};
use attribution_relay::storage::{EventCache, WatermarkStore};
use attribution_relay::warehouse::{EventWarehouse, WarehouseRow};
use attribution_relay::RunContext;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// Row that landed in the warehouse at its event time.
pub fn row(event_name: &str, subscriber_id: &str, age: chrono::Duration) -> WarehouseRow {
    late_row(event_name, subscriber_id, age, age)
}

/// Row exported `age` ago that only landed in the warehouse `inserted_age` ago.
pub fn late_row(
    event_name: &str,
    subscriber_id: &str,
    age: chrono::Duration,
    inserted_age: chrono::Duration,
) -> WarehouseRow {
    WarehouseRow {
        event_time: now() - age,
        event_name: event_name.to_string(),
        subscriber_id: subscriber_id.to_string(),
        inserted_at: Some(now() - inserted_age),
    }
}

/// In-memory stand-in for the ClickHouse export table. Rows are kept in
/// the order they were pushed.
#[derive(Default)]
pub struct FakeWarehouse {
    rows: Mutex<Vec<WarehouseRow>>,
    fail: AtomicBool,
    pub queries: AtomicU32,
}

impl FakeWarehouse {
    pub fn with_rows(rows: Vec<WarehouseRow>) -> Self {
        let warehouse = Self::default();
        warehouse.push(rows);
        warehouse
    }

    pub fn push(&self, rows: Vec<WarehouseRow>) {
        self.rows.lock().unwrap().extend(rows);
    }

    pub fn truncate(&self, len: usize) {
        self.rows.lock().unwrap().truncate(len);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Warehouse("Connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventWarehouse for FakeWarehouse {
    async fn count_events(&self) -> Result<u64> {
        self.check()?;
        Ok(self.rows.lock().unwrap().len() as u64)
    }

    async fn fetch_latest(&self, limit: u64) -> Result<Vec<WarehouseRow>> {
        self.check()?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .rev()
            .take(limit as usize)
            .map(|r| WarehouseRow {
                inserted_at: None,
                ..r.clone()
            })
            .collect())
    }

    async fn fetch_inserted_since(&self, after: DateTime<Utc>) -> Result<Vec<WarehouseRow>> {
        self.check()?;
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.inserted_at.is_some_and(|ts| ts > after))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.inserted_at);
        Ok(rows)
    }
}

pub struct TestEnv {
    pub ctx: RunContext,
    pub clock: Arc<FixedClock>,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn watermark_path(&self) -> std::path::PathBuf {
        self.ctx.watermarks.path().to_path_buf()
    }
}

pub fn test_config(dir: &TempDir, tracker_url: &str, mode: WatermarkMode) -> Config {
    Config {
        watermark: WatermarkConfig {
            mode,
            path: dir.path().join("var_storage.json"),
            initial_lookback: Duration::from_secs(24 * 60 * 60),
        },
        tracker: TrackerConfig {
            base_url: tracker_url.to_string(),
            request_timeout: Duration::from_secs(5),
            max_attempts: 2,
            retry_delay: Duration::from_millis(10),
        },
        ..Default::default()
    }
}

pub async fn test_env_in(dir: TempDir, config: Config) -> TestEnv {
    let clock = Arc::new(FixedClock::new(now()));
    let cache = EventCache::in_memory().await.unwrap();
    let watermarks = WatermarkStore::new(config.watermark.path.clone());
    let ctx = RunContext::new(config, cache, watermarks, clock.clone());
    TestEnv { ctx, clock, dir }
}

/// Environment with a tracker pointing at `tracker_url` and row-count watermarks.
pub async fn env_for(tracker_url: &str) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, tracker_url, WatermarkMode::RowCount);
    test_env_in(dir, config).await
}
