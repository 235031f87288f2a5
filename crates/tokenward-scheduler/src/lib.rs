//! tokenward-scheduler: keeps stored credentials alive.
//!
//! The scheduler walks every configured connection once per check
//! interval. For each it:
//!
//! - Reads the credential from the store (missing means unmanaged)
//! - Probes the executor and looks up the token's TTL
//! - Applies the renewal policy and per-connection backoff
//! - Renews, writes rotated secrets back, and notifies
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── CredentialStore  (get / set, availability checked at start)
//!   ├── TokenExecutor    (probe / lookup / renew)
//!   ├── Notifier         (best-effort success / failure)
//!   ├── BackoffTracker   (per-connection exponential delay)
//!   └── HealthAggregator (counters read by the health endpoints)
//! ```

pub mod backoff;
pub mod error;
pub mod scheduler;

pub use backoff::{BackoffRecord, BackoffTracker};
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{ConnectionOutcome, CycleReport, Scheduler};
