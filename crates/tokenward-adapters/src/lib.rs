//! tokenward-adapters: concrete collaborators for the renewal scheduler.
//!
//! - [`FileStore`]: JSON file of connection name → secret
//! - [`VaultCliExecutor`]: lookups and renewals through the `vault` CLI
//! - [`LogNotifier`] / [`CommandNotifier`]: renewal notifications

pub mod file_store;
pub mod notifier;
pub mod vault_cli;

pub use file_store::FileStore;
pub use notifier::{CommandNotifier, LogNotifier};
pub use vault_cli::VaultCliExecutor;
