/// Incremental fetch of attribution events.
///
/// Decides what is "new since last run" from the persisted watermark, runs a
/// single warehouse query and advances the watermark when rows came back.
/// Warehouse errors are returned as-is and end the run.
use crate::config::WatermarkMode;
use crate::context::RunContext;
use crate::error::Result;
use crate::models::{AttributionEvent, EventKind};
use crate::storage::Watermark;
use crate::warehouse::{EventWarehouse, WarehouseRow};
use tracing::{debug, info, warn};

pub struct Fetcher<'a> {
    warehouse: &'a dyn EventWarehouse,
    ctx: &'a RunContext,
}

impl<'a> Fetcher<'a> {
    pub fn new(warehouse: &'a dyn EventWarehouse, ctx: &'a RunContext) -> Self {
        Self { warehouse, ctx }
    }

    /// New events in chronological order. Empty means there is nothing to do.
    pub async fn fetch_new_events(&self) -> Result<Vec<AttributionEvent>> {
        let mode = self.ctx.config.watermark.mode;
        let previous = self.ctx.watermarks.load(mode).await?;

        let rows = match mode {
            WatermarkMode::RowCount => self.fetch_by_row_count(previous).await?,
            WatermarkMode::InsertedAt => self.fetch_by_inserted_at(previous).await?,
        };

        Ok(into_events(rows))
    }

    async fn fetch_by_row_count(&self, previous: Option<Watermark>) -> Result<Vec<WarehouseRow>> {
        let prev_rows = match previous {
            Some(Watermark::RowCount(count)) => count,
            _ => 0,
        };

        let count = self.warehouse.count_events().await?;

        if count == prev_rows {
            debug!(count, "Row count unchanged, nothing new");
            return Ok(Vec::new());
        }

        if count < prev_rows {
            warn!(
                count,
                prev_rows, "Warehouse row count went down, resynchronising watermark"
            );
            self.ctx.watermarks.save(Watermark::RowCount(count)).await?;
            return Ok(Vec::new());
        }

        let delta = count - prev_rows;
        let mut rows = self.warehouse.fetch_latest(delta).await?;

        if rows.is_empty() {
            warn!(delta, "Row count grew but no rows came back, keeping watermark");
            return Ok(rows);
        }

        self.ctx.watermarks.save(Watermark::RowCount(count)).await?;
        info!(new_rows = rows.len(), count, "Fetched new attribution rows");

        // Newest first from the warehouse; forward them oldest first
        rows.reverse();
        Ok(rows)
    }

    async fn fetch_by_inserted_at(&self, previous: Option<Watermark>) -> Result<Vec<WarehouseRow>> {
        let after = match previous {
            Some(Watermark::InsertedAt(ts)) => ts,
            _ => {
                let lookback = chrono::Duration::from_std(self.ctx.config.watermark.initial_lookback)
                    .unwrap_or_else(|_| chrono::Duration::days(1));
                let start = self.ctx.now() - lookback;
                info!(start = %start, "No insertion-time watermark yet, using initial lookback");
                start
            }
        };

        let mut rows = self.warehouse.fetch_inserted_since(after).await?;

        let Some(newest) = rows.iter().filter_map(|row| row.inserted_at).max() else {
            if !rows.is_empty() {
                warn!(count = rows.len(), "Rows came back without an insertion time, keeping watermark");
            }
            debug!(after = %after, "No rows inserted after watermark");
            return Ok(rows);
        };

        self.ctx.watermarks.save(Watermark::InsertedAt(newest)).await?;
        info!(new_rows = rows.len(), watermark = %newest, "Fetched new attribution rows");

        // Late rows arrive in insertion order; forward them by event time
        rows.sort_by_key(|row| row.event_time);
        Ok(rows)
    }
}

fn into_events(rows: Vec<WarehouseRow>) -> Vec<AttributionEvent> {
    rows.into_iter()
        .filter_map(|row| {
            let Some(kind) = EventKind::from_event_name(&row.event_name) else {
                warn!(event_name = %row.event_name, "Unknown event name, skipping row");
                return None;
            };

            if row.subscriber_id.is_empty() {
                warn!(event_name = %row.event_name, event_time = %row.event_time, "Row without subscriber id, skipping");
                return None;
            }

            Some(AttributionEvent::new(row.event_time, kind, row.subscriber_id))
        })
        .collect()
}
