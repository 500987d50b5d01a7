//! Attribution relay
//!
//! Batch job that polls the analytics warehouse for new marketing-attribution
//! events (installs, trial starts, subscriptions, trial cancellations),
//! deduplicates them against a local SQLite cache and forwards each new event
//! to the tracking endpoint as an HTTP postback.
//!
//! One invocation is one run; scheduling is left to cron / systemd timers,
//! which must not start overlapping runs.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod warehouse;

pub use config::Config;
pub use context::RunContext;
pub use error::{RelayError, Result};
pub use services::run_once;
