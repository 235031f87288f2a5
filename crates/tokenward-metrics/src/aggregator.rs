//! Health aggregator: counters and timestamps shared between the renewal
//! loop and the health endpoints.
//!
//! All fields live behind a single `RwLock` so a reader always sees one
//! consistent point in time. Writes happen at most once per cycle plus
//! once per renewal event, so lock contention is negligible.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use tokenward_core::format_duration;

struct HealthState {
    tokens_managed: u64,
    renewals_total: u64,
    errors_total: u64,
    last_check: Option<SystemTime>,
}

/// Shared handle to the health counters. Cloning is cheap.
#[derive(Clone)]
pub struct HealthAggregator {
    state: Arc<RwLock<HealthState>>,
    started: Instant,
    started_at: SystemTime,
}

/// A consistent copy of the health counters.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub started_at: SystemTime,
    pub uptime: Duration,
    pub last_check: Option<SystemTime>,
    pub tokens_managed: u64,
    pub renewals_total: u64,
    pub errors_total: u64,
}

/// JSON body served by `GET /health`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime: String,
    pub uptime_seconds: u64,
    pub last_check: Option<String>,
    pub tokens_managed: u64,
    pub renewals_total: u64,
    pub errors_total: u64,
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthAggregator {
    /// Create an aggregator; the process start time is taken as now.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState {
                tokens_managed: 0,
                renewals_total: 0,
                errors_total: 0,
                last_check: None,
            })),
            started: Instant::now(),
            started_at: SystemTime::now(),
        }
    }

    /// Record the end of a check cycle that saw `tokens_managed` credentials.
    pub async fn record_check(&self, tokens_managed: u64) {
        let mut state = self.state.write().await;
        state.tokens_managed = tokens_managed;
        state.last_check = Some(SystemTime::now());
        debug!(tokens_managed, "check cycle recorded");
    }

    pub async fn record_renewal(&self) {
        let mut state = self.state.write().await;
        state.renewals_total += 1;
    }

    pub async fn record_error(&self) {
        let mut state = self.state.write().await;
        state.errors_total += 1;
    }

    /// Copy every field under one read lock.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.read().await;
        HealthSnapshot {
            started_at: self.started_at,
            uptime: self.started.elapsed(),
            last_check: state.last_check,
            tokens_managed: state.tokens_managed,
            renewals_total: state.renewals_total,
            errors_total: state.errors_total,
        }
    }
}

impl HealthSnapshot {
    /// Seconds since the Unix epoch of the last check, or 0 if none ran yet.
    pub fn last_check_epoch_secs(&self) -> u64 {
        self.last_check
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            uptime: format_duration(self.uptime),
            uptime_seconds: self.uptime.as_secs(),
            last_check: self.last_check.map(|t| {
                DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
            }),
            tokens_managed: self.tokens_managed,
            renewals_total: self.renewals_total,
            errors_total: self.errors_total,
        }
    }
}
