//! tokenward-metrics: health counters for the renewal daemon.
//!
//! Tracks how many credentials the last cycle saw, cumulative renewals and
//! errors, and when the last cycle finished. Both read projections are
//! derived from one snapshot taken under a single lock.
//!
//! # Architecture
//!
//! ```text
//! HealthAggregator
//!   ├── record_check() / record_renewal() / record_error()  ← scheduler
//!   └── snapshot() → HealthSnapshot
//!         ├── report()             → JSON for /health
//!         └── render_prometheus()  → text/plain for /metrics
//! ```

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{HealthAggregator, HealthReport, HealthSnapshot};
pub use prometheus::render_prometheus;
