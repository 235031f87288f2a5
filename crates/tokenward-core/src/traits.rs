//! Capability traits for the collaborators the scheduler drives.
//!
//! Concrete adapters live in `tokenward-adapters`; tests provide their own
//! in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExecutorResult, NotifyResult, StoreResult};
use crate::types::{Connection, RenewOutcome, TokenStatus};

/// Persistent storage for credential secrets, keyed by connection name.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a secret. `Ok(None)` means no credential is stored.
    async fn get(&self, name: &str) -> StoreResult<Option<String>>;

    /// Store or replace a secret.
    async fn set(&self, name: &str, secret: &str) -> StoreResult<()>;

    /// Remove a secret. Returns whether one existed.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    /// Check that the backend is usable at all.
    async fn is_available(&self) -> StoreResult<()>;
}

/// Performs lookups and renewals against the credential issuer.
///
/// Implementations are responsible for their own call timeouts.
#[async_trait]
pub trait TokenExecutor: Send + Sync {
    /// Check that the executor can serve this connection.
    async fn probe(&self, connection: &Connection) -> ExecutorResult<()>;

    async fn lookup(&self, connection: &Connection, secret: &str) -> ExecutorResult<TokenStatus>;

    async fn renew(&self, connection: &Connection, secret: &str) -> ExecutorResult<RenewOutcome>;

    async fn revoke(&self, connection: &Connection, secret: &str) -> ExecutorResult<()>;
}

/// Delivers renewal outcomes to a human.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_renewal(&self, name: &str, new_ttl: Duration) -> NotifyResult<()>;

    async fn notify_failure(&self, name: &str, error: &str) -> NotifyResult<()>;
}
