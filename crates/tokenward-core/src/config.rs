//! tokenward.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::policy::RenewalPolicy;
use crate::types::Connection;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RENEWAL_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MIN_RENEWAL_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_HEALTH_HOST: &str = "127.0.0.1";
pub const DEFAULT_HEALTH_PORT: u16 = 9464;
pub const DEFAULT_STORE_PATH: &str = "tokenward-credentials.json";
pub const DEFAULT_EXECUTOR_BINARY: &str = "vault";
pub const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenwardConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub check_interval: Option<String>,
    pub renewal_threshold: Option<f64>,
    pub min_renewal_ttl: Option<String>,
    pub initial_backoff: Option<String>,
    pub max_backoff: Option<String>,
    /// PID file written while the scheduler runs.
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSection {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    pub binary: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsSection {
    pub enabled: Option<bool>,
    /// Desktop notification command, e.g. `notify-send`.
    pub command: Option<String>,
}

/// Validated scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub check_interval: Duration,
    pub policy: RenewalPolicy,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub pid_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            policy: RenewalPolicy::new(DEFAULT_MIN_RENEWAL_TTL, DEFAULT_RENEWAL_THRESHOLD),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            pid_file: None,
        }
    }
}

impl TokenwardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: TokenwardConfig = toml::from_str(content)?;
        config.validate_connections()?;
        Ok(config)
    }

    /// Resolve and validate the scheduler section.
    pub fn scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        let s = &self.scheduler;

        let check_interval =
            duration_field("scheduler.check_interval", &s.check_interval, DEFAULT_CHECK_INTERVAL)?;
        if check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.check_interval",
                reason: "must be greater than zero".to_string(),
            });
        }

        let threshold = s.renewal_threshold.unwrap_or(DEFAULT_RENEWAL_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.renewal_threshold",
                reason: format!("{threshold} is outside 0.0-1.0"),
            });
        }

        let min_ttl =
            duration_field("scheduler.min_renewal_ttl", &s.min_renewal_ttl, DEFAULT_MIN_RENEWAL_TTL)?;
        // Zero backoff values fall back to the defaults in the tracker.
        let initial_backoff =
            duration_field("scheduler.initial_backoff", &s.initial_backoff, DEFAULT_INITIAL_BACKOFF)?;
        let max_backoff =
            duration_field("scheduler.max_backoff", &s.max_backoff, DEFAULT_MAX_BACKOFF)?;

        Ok(SchedulerConfig {
            check_interval,
            policy: RenewalPolicy::new(min_ttl, threshold),
            initial_backoff,
            max_backoff,
            pid_file: s.pid_file.clone(),
        })
    }

    pub fn health_enabled(&self) -> bool {
        self.health.enabled.unwrap_or(true)
    }

    /// Health listener address. Loopback unless a host is configured.
    pub fn health_addr(&self) -> String {
        let host = self.health.host.as_deref().unwrap_or(DEFAULT_HEALTH_HOST);
        let port = self.health.port.unwrap_or(DEFAULT_HEALTH_PORT);
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn executor_binary(&self) -> &str {
        self.executor.binary.as_deref().unwrap_or(DEFAULT_EXECUTOR_BINARY)
    }

    pub fn executor_timeout(&self) -> ConfigResult<Duration> {
        duration_field("executor.timeout", &self.executor.timeout, DEFAULT_EXECUTOR_TIMEOUT)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications.enabled.unwrap_or(false)
    }

    fn validate_connections(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for conn in &self.connections {
            if conn.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "connections.name",
                    reason: "must not be empty".to_string(),
                });
            }
            if !seen.insert(conn.name.as_str()) {
                return Err(ConfigError::DuplicateConnection(conn.name.clone()));
            }
        }
        Ok(())
    }
}

fn duration_field(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidValue {
            field,
            reason: format!("cannot parse duration {raw:?}"),
        }),
    }
}
