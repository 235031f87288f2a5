//! Renewal policy: decides whether a credential should be renewed now.

use std::time::Duration;

use crate::types::TokenStatus;

/// Thresholds that drive the renewal decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenewalPolicy {
    /// Renew once less than this much lifetime remains.
    pub min_ttl: Duration,
    /// Renew once this fraction (0.0–1.0) of the creation TTL has elapsed.
    pub threshold: f64,
}

impl RenewalPolicy {
    pub fn new(min_ttl: Duration, threshold: f64) -> Self {
        Self { min_ttl, threshold }
    }

    /// Evaluate a token status snapshot against this policy.
    pub fn needs_renewal(&self, status: &TokenStatus) -> bool {
        needs_renewal(
            status.ttl_secs,
            status.creation_ttl_secs,
            status.renewable,
            self.min_ttl,
            self.threshold,
        )
    }
}

/// Whether a credential needs renewal.
///
/// A TTL of zero or below never needs renewal: the token is either already
/// expired or has no expiry. Otherwise the token is renewed when it is
/// below `min_ttl`, or when the elapsed share of `creation_ttl_secs` has
/// reached `threshold`. `renewable` does not influence the decision.
pub fn needs_renewal(
    ttl_secs: i64,
    creation_ttl_secs: i64,
    _renewable: bool,
    min_ttl: Duration,
    threshold: f64,
) -> bool {
    if ttl_secs <= 0 {
        return false;
    }

    if (ttl_secs as u128) < min_ttl.as_secs() as u128 {
        return true;
    }

    if creation_ttl_secs > 0 {
        let elapsed = (creation_ttl_secs - ttl_secs) as f64 / creation_ttl_secs as f64;
        if elapsed >= threshold {
            return true;
        }
    }

    false
}
