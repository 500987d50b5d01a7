pub mod fetcher;
pub mod forwarder;
pub mod tracker;

pub use fetcher::Fetcher;
pub use forwarder::{CategoryStats, Forwarder, RunSummary};
pub use tracker::{CallFailure, HttpCallError, RetryingHttpClient, TrackerClient};

use crate::context::RunContext;
use crate::error::Result;
use crate::warehouse::EventWarehouse;
use tracing::info;

/// One relay run: fetch what is new, forward it, maintain the cache.
///
/// Returns `None` when the warehouse had nothing new; the forwarder (and with
/// it the confirmation and prune passes) only runs when there are events.
pub async fn run_once(
    ctx: &RunContext,
    warehouse: &dyn EventWarehouse,
    tracker: &TrackerClient,
) -> Result<Option<RunSummary>> {
    let events = Fetcher::new(warehouse, ctx).fetch_new_events().await?;

    if events.is_empty() {
        info!("No new attribution events");
        return Ok(None);
    }

    let summary = Forwarder::new(ctx, tracker).forward(events).await;
    Ok(Some(summary))
}
