//! Per-run state: everything one relay run touches, opened once and closed at the end.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::storage::{EventCache, WatermarkStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct RunContext {
    pub config: Config,
    pub cache: EventCache,
    pub watermarks: WatermarkStore,
    clock: Arc<dyn Clock>,
}

impl RunContext {
    /// Open the cache database and watermark store named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let cache = EventCache::open(&config.cache.db_path, config.cache.busy_timeout).await?;
        let watermarks = WatermarkStore::new(config.watermark.path.clone());
        Ok(Self::new(config, cache, watermarks, Arc::new(SystemClock)))
    }

    pub fn new(
        config: Config,
        cache: EventCache,
        watermarks: WatermarkStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            watermarks,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn close(self) {
        self.cache.close().await;
    }
}
