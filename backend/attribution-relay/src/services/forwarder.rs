/// Forwarder - dedup against the local cache and send one postback per new event
///
/// ## Flow
///
/// 1. installs, activations, trial starts, trial cancels (in that order);
///    each event is first recorded in the cache, duplicates are skipped
/// 2. a trial cancel or a conversion drops the subscriber's pending trial,
///    even when the cancel or conversion row itself is a duplicate
/// 3. pending trials older than the confirmation delay are confirmed
///    and removed from the cache
/// 4. cache rows older than the retention window are pruned
///
/// Tracker failures are per event: logged, counted, and the run moves on.
/// Cache errors abandon the mutation at hand; the event is not forwarded.
use crate::context::RunContext;
use crate::models::{AttributionEvent, EventBatch, EventKind, Postback};
use crate::services::tracker::TrackerClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub forwarded: u32,
    /// Already in the cache
    pub duplicates: u32,
    /// Cached but not sent yet (trial starts waiting for confirmation)
    pub deferred: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub installs: CategoryStats,
    pub activations: CategoryStats,
    pub trial_starts: CategoryStats,
    pub trial_cancels: CategoryStats,
    /// Pending trials removed because a cancel arrived first
    pub cancelled_pending_trials: u64,
    /// Pending trials removed because the subscriber converted
    pub converted_pending_trials: u64,
    pub confirmed_trials: u32,
    pub confirmation_failures: u32,
    pub pruned: u64,
}

impl RunSummary {
    pub fn failures(&self) -> u32 {
        self.installs.failed
            + self.activations.failed
            + self.trial_starts.failed
            + self.trial_cancels.failed
            + self.confirmation_failures
    }

    pub fn log(&self) {
        info!(
            fetched = self.fetched,
            installs = self.installs.forwarded,
            activations = self.activations.forwarded,
            trial_starts = self.trial_starts.forwarded,
            trial_cancels = self.trial_cancels.forwarded,
            duplicates = self.installs.duplicates
                + self.activations.duplicates
                + self.trial_starts.duplicates
                + self.trial_cancels.duplicates,
            confirmed_trials = self.confirmed_trials,
            failures = self.failures(),
            pruned = self.pruned,
            "Attribution relay run finished"
        );

        match serde_json::to_string(self) {
            Ok(summary) => debug!(%summary, "Run summary"),
            Err(e) => warn!(error = %e, "Run summary could not be serialized"),
        }
    }
}

pub struct Forwarder<'a> {
    ctx: &'a RunContext,
    tracker: &'a TrackerClient,
}

impl<'a> Forwarder<'a> {
    pub fn new(ctx: &'a RunContext, tracker: &'a TrackerClient) -> Self {
        Self { ctx, tracker }
    }

    pub async fn forward(&self, events: Vec<AttributionEvent>) -> RunSummary {
        let batch = EventBatch::partition(events);
        let mut summary = RunSummary {
            fetched: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            return summary;
        }

        debug!(
            installs = batch.installs.len(),
            activations = batch.activations.len(),
            trial_starts = batch.trial_starts.len(),
            trial_cancels = batch.trial_cancels.len(),
            "Processing event batch"
        );

        for event in &batch.installs {
            self.relay(event, Postback::Install, &mut summary.installs)
                .await;
        }

        for event in &batch.activations {
            self.relay_conversion(event, &mut summary).await;
        }

        for event in &batch.trial_starts {
            if self.ctx.config.pipeline.forward_trial_start {
                self.relay(event, Postback::TrialStarted, &mut summary.trial_starts)
                    .await;
            } else if self.record(event, &mut summary.trial_starts).await {
                summary.trial_starts.deferred += 1;
            }
        }

        for event in &batch.trial_cancels {
            self.relay_cancel(event, &mut summary).await;
        }

        self.confirm_settled_trials(&mut summary).await;
        summary.pruned = self.prune().await;

        summary
    }

    /// Record in the cache, then send if the event was new.
    async fn relay(&self, event: &AttributionEvent, postback: Postback, stats: &mut CategoryStats) {
        if self.record(event, stats).await {
            self.send(postback, &event.subscriber_id, stats).await;
        }
    }

    /// A conversion ends the trial: it must never be confirmed afterwards.
    async fn relay_conversion(&self, event: &AttributionEvent, summary: &mut RunSummary) {
        let is_new = self.record(event, &mut summary.activations).await;
        summary.converted_pending_trials += self.drop_pending_trial(&event.subscriber_id).await;

        if is_new {
            self.send(Postback::TrialConverted, &event.subscriber_id, &mut summary.activations)
                .await;
        }
    }

    /// The pending trial is dropped even when the cancel row is a duplicate:
    /// an earlier cancel of the same subscriber may still be cached when a
    /// second trial gets cancelled.
    async fn relay_cancel(&self, event: &AttributionEvent, summary: &mut RunSummary) {
        let is_new = match self.ctx.cache.insert_if_absent(event, self.ctx.now()).await {
            Ok(is_new) => is_new,
            Err(e) => {
                error!(
                    subscriber_id = %event.subscriber_id,
                    event_name = %event.kind,
                    error = %e,
                    "Failed to record event in cache, skipping"
                );
                summary.trial_cancels.failed += 1;
                return;
            }
        };

        let removed = self.drop_pending_trial(&event.subscriber_id).await;
        if removed > 0 {
            info!(subscriber_id = %event.subscriber_id, "Pending trial cancelled before confirmation");
        }
        summary.cancelled_pending_trials += removed;

        // A repeated cancel row is only news when it cancelled a new trial
        if !is_new && removed == 0 {
            summary.trial_cancels.duplicates += 1;
            return;
        }

        self.send(Postback::TrialCancelled, &event.subscriber_id, &mut summary.trial_cancels)
            .await;
    }

    async fn drop_pending_trial(&self, subscriber_id: &str) -> u64 {
        match self.ctx.cache.remove(subscriber_id, EventKind::TrialStart).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(
                    subscriber_id = %subscriber_id,
                    error = %e,
                    "Failed to remove pending trial from cache"
                );
                0
            }
        }
    }

    /// Returns `true` when the event was not cached before.
    async fn record(&self, event: &AttributionEvent, stats: &mut CategoryStats) -> bool {
        match self.ctx.cache.insert_if_absent(event, self.ctx.now()).await {
            Ok(true) => true,
            Ok(false) => {
                stats.duplicates += 1;
                false
            }
            Err(e) => {
                error!(
                    subscriber_id = %event.subscriber_id,
                    event_name = %event.kind,
                    error = %e,
                    "Failed to record event in cache, skipping"
                );
                stats.failed += 1;
                false
            }
        }
    }

    async fn send(&self, postback: Postback, subscriber_id: &str, stats: &mut CategoryStats) {
        match self.tracker.send(postback, subscriber_id).await {
            Ok(_) => stats.forwarded += 1,
            Err(e) => {
                error!(
                    subscriber_id = %subscriber_id,
                    cnv_status = postback.status(),
                    error = %e,
                    "Postback not delivered"
                );
                stats.failed += 1;
            }
        }
    }

    async fn confirm_settled_trials(&self, summary: &mut RunSummary) {
        let settled_before = self.cutoff(self.ctx.config.pipeline.confirmation_delay);

        let pending = match self.ctx.cache.pending_trials(settled_before).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending trials, skipping confirmation");
                return;
            }
        };

        for entry in pending {
            match self
                .tracker
                .send(Postback::TrialConfirmed, &entry.subscriber_id)
                .await
            {
                Ok(_) => {
                    summary.confirmed_trials += 1;
                    if let Err(e) = self
                        .ctx
                        .cache
                        .remove(&entry.subscriber_id, EventKind::TrialStart)
                        .await
                    {
                        error!(
                            subscriber_id = %entry.subscriber_id,
                            error = %e,
                            "Confirmed trial could not be removed from cache"
                        );
                    }
                }
                Err(e) => {
                    // Stays in the cache, next run tries again
                    warn!(
                        subscriber_id = %entry.subscriber_id,
                        error = %e,
                        "Trial confirmation not delivered"
                    );
                    summary.confirmation_failures += 1;
                }
            }
        }
    }

    async fn prune(&self) -> u64 {
        let cutoff = self.cutoff(self.ctx.config.pipeline.retention);

        match self.ctx.cache.prune_older_than(cutoff).await {
            Ok(pruned) => {
                if pruned > 0 {
                    info!(pruned, cutoff = %cutoff, "Pruned stale cache rows");
                }
                pruned
            }
            Err(e) => {
                error!(error = %e, "Failed to prune cache");
                0
            }
        }
    }

    fn cutoff(&self, age: Duration) -> DateTime<Utc> {
        let now = self.ctx.now();
        chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
