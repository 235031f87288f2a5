//! tokenward-core: shared types, configuration, and the renewal policy.
//!
//! Everything here is free of I/O scheduling concerns: the renewal policy is
//! a pure function and the collaborator traits only describe capabilities.

pub mod config;
pub mod duration;
pub mod error;
pub mod policy;
pub mod traits;
pub mod types;

pub use config::{SchedulerConfig, TokenwardConfig};
pub use duration::{format_duration, parse_duration};
pub use error::*;
pub use policy::{RenewalPolicy, needs_renewal};
pub use traits::{CredentialStore, Notifier, TokenExecutor};
pub use types::*;
