//! Per-connection exponential backoff after failed renewals.
//!
//! A connection without a record is healthy. The first failure creates a
//! record; every further failure doubles the delay up to the cap. A success
//! deletes the record outright, so the next failure starts again at the
//! initial delay.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Delay used when the configured initial backoff is zero.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(30);
/// Cap used when the configured maximum backoff is zero.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Failure bookkeeping for one connection. `failures` is always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRecord {
    pub failures: u32,
    pub next_retry: Instant,
}

/// Tracks backoff state for every connection behind one lock.
#[derive(Debug)]
pub struct BackoffTracker {
    records: Mutex<HashMap<String, BackoffRecord>>,
    initial: Duration,
    max: Duration,
}

impl BackoffTracker {
    /// Create a tracker. Zero durations fall back to the defaults.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = if initial.is_zero() {
            DEFAULT_INITIAL_BACKOFF
        } else {
            initial
        };
        let max = if max.is_zero() { DEFAULT_MAX_BACKOFF } else { max };
        Self {
            records: Mutex::new(HashMap::new()),
            initial,
            max,
        }
    }

    /// Delay imposed after the given number of consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Record a failure and return the delay until the next attempt.
    pub fn record_failure(&self, name: &str, now: Instant) -> Duration {
        let mut records = self.records.lock();
        let failures = records.get(name).map_or(1, |r| r.failures.saturating_add(1));
        let delay = self.delay_for(failures);
        records.insert(
            name.to_string(),
            BackoffRecord {
                failures,
                next_retry: now + delay,
            },
        );
        debug!(connection = %name, failures, ?delay, "backoff extended");
        delay
    }

    /// Clear the record for a connection. Returns whether one existed.
    pub fn record_success(&self, name: &str) -> bool {
        self.records.lock().remove(name).is_some()
    }

    /// Whether an attempt for this connection should be skipped at `now`.
    pub fn should_skip(&self, name: &str, now: Instant) -> bool {
        self.records
            .lock()
            .get(name)
            .is_some_and(|r| now < r.next_retry)
    }

    pub fn record(&self, name: &str) -> Option<BackoffRecord> {
        self.records.lock().get(name).copied()
    }

    /// Number of connections currently cooling down or awaiting retry.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
