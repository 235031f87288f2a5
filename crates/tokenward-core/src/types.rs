//! Domain types shared by the scheduler and the collaborator adapters.
//!
//! None of these are persisted by the core: connections come from static
//! configuration and token snapshots are produced fresh every cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name that uniquely identifies a managed connection.
pub type ConnectionName = String;

/// One managed external endpoint whose credential is kept alive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    /// Unique name; also the credential store key.
    pub name: ConnectionName,
    /// Address of the credential issuer (e.g. `https://vault.example.com:8200`).
    #[serde(default)]
    pub address: Option<String>,
    /// Executor binary override for this connection.
    #[serde(default)]
    pub binary: Option<String>,
}

impl Connection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            binary: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Point-in-time view of a credential's lifetime, as reported by the issuer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenStatus {
    /// Seconds remaining before expiry. Zero or negative means expired or
    /// non-expiring.
    pub ttl_secs: i64,
    /// TTL assigned at issuance.
    pub creation_ttl_secs: i64,
    /// Whether the issuer allows extending the credential in place.
    pub renewable: bool,
}

impl TokenStatus {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(0) as u64)
    }

    pub fn creation_ttl(&self) -> Duration {
        Duration::from_secs(self.creation_ttl_secs.max(0) as u64)
    }
}

/// Result of a successful renewal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenewOutcome {
    /// Set when the issuer rotated the credential string.
    pub new_secret: Option<String>,
    /// Lease granted by the renewal, in seconds.
    pub new_ttl_secs: i64,
    pub renewable: bool,
}

impl RenewOutcome {
    /// The rotated secret, if it differs from `current`.
    pub fn rotated_secret<'a>(&'a self, current: &str) -> Option<&'a str> {
        self.new_secret
            .as_deref()
            .filter(|s| !s.is_empty() && *s != current)
    }
}
