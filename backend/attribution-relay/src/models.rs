use chrono::{DateTime, Utc};
use std::fmt;

/// Attribution event kinds the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    TrialStart,
    /// Paid subscription, i.e. the trial converted
    Subscribe,
    TrialCancel,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Install,
        EventKind::TrialStart,
        EventKind::Subscribe,
        EventKind::TrialCancel,
    ];

    /// `event_name` as exported to the warehouse and stored in the cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::TrialStart => "af_start_trial",
            EventKind::Subscribe => "af_subscribe",
            EventKind::TrialCancel => "trial_renewal_cancelled",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row fetched from the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionEvent {
    pub event_time: DateTime<Utc>,
    pub kind: EventKind,
    /// `af_sub1` in the export, the click id the tracker knows the user by
    pub subscriber_id: String,
}

impl AttributionEvent {
    pub fn new(event_time: DateTime<Utc>, kind: EventKind, subscriber_id: impl Into<String>) -> Self {
        Self {
            event_time,
            kind,
            subscriber_id: subscriber_id.into(),
        }
    }
}

/// Fetched events split into the working sets the forwarder walks through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub installs: Vec<AttributionEvent>,
    pub activations: Vec<AttributionEvent>,
    pub trial_starts: Vec<AttributionEvent>,
    pub trial_cancels: Vec<AttributionEvent>,
}

impl EventBatch {
    pub fn partition(events: impl IntoIterator<Item = AttributionEvent>) -> Self {
        let mut batch = EventBatch::default();
        for event in events {
            match event.kind {
                EventKind::Install => batch.installs.push(event),
                EventKind::Subscribe => batch.activations.push(event),
                EventKind::TrialStart => batch.trial_starts.push(event),
                EventKind::TrialCancel => batch.trial_cancels.push(event),
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.installs.len() + self.activations.len() + self.trial_starts.len() + self.trial_cancels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row in the local dedup cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub inserted_at: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
    pub kind: EventKind,
    pub subscriber_id: String,
}

/// Postback flavours understood by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postback {
    Install,
    TrialStarted,
    /// Trial that survived the confirmation window. Same wire format as
    /// `TrialStarted`, kept apart for logging and counting.
    TrialConfirmed,
    TrialConverted,
    TrialCancelled,
}

impl Postback {
    /// Value of the `cnv_status` query parameter.
    pub fn status(&self) -> &'static str {
        match self {
            Postback::Install => "install",
            Postback::TrialStarted | Postback::TrialConfirmed => "trial_started",
            Postback::TrialConverted => "trial_converted",
            Postback::TrialCancelled => "trial_renewal_cancelled",
        }
    }

    /// Name of the `eventN` flag set to 1.
    pub fn event_flag(&self) -> &'static str {
        match self {
            Postback::Install => "event1",
            Postback::TrialStarted | Postback::TrialConfirmed => "event2",
            Postback::TrialConverted => "event4",
            Postback::TrialCancelled => "event5",
        }
    }

    pub fn query_params(&self, subscriber_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("cnv_id", subscriber_id.to_string()),
            ("cnv_status", self.status().to_string()),
            (self.event_flag(), "1".to_string()),
        ]
    }
}
