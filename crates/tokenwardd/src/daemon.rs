//! Subcommand implementations: wiring config, adapters and the scheduler.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tokenward_adapters::{CommandNotifier, FileStore, LogNotifier, VaultCliExecutor};
use tokenward_core::{CredentialStore, Notifier, TokenExecutor, TokenwardConfig};
use tokenward_metrics::HealthAggregator;
use tokenward_scheduler::{CycleReport, Scheduler};

const DEFAULT_NOTIFY_COMMAND: &str = "notify-send";

pub async fn run(
    config_path: &Path,
    health_host: Option<String>,
    health_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if health_host.is_some() {
        config.health.host = health_host;
    }
    if health_port.is_some() {
        config.health.port = health_port;
    }

    info!(config = %config_path.display(), "tokenward daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = Arc::new(FileStore::new(config.store_path()));
    info!(path = %store.path().display(), "credential store configured");

    let executor = Arc::new(build_executor(&config)?);
    let scheduler = build_scheduler(&config, store, executor)?;

    // ── Start health server ────────────────────────────────────

    let health_server = if config.health_enabled() {
        let addr = config.health_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind health listener on {addr}"))?;
        Some(tokio::spawn(tokenward_api::serve(
            listener,
            scheduler.health().clone(),
            scheduler.listener_shutdown(),
        )))
    } else {
        info!("health server disabled");
        None
    };

    // ── Run until stopped ──────────────────────────────────────

    // Signals are handled by the scheduler; the sender only has to outlive it.
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = scheduler.run(cancel_rx).await;

    if let Some(handle) = health_server {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "health server exited with error"),
            Err(e) => error!(error = %e, "health server task panicked"),
        }
    }

    result.context("renewal scheduler failed")?;
    info!("tokenward daemon stopped");
    Ok(())
}

pub async fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let executor = Arc::new(build_executor(&config)?);
    let report = check_with(&config, executor).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    ensure_clean(&report)
}

/// One check cycle against the configured store with the given executor.
pub async fn check_with(
    config: &TokenwardConfig,
    executor: Arc<dyn TokenExecutor>,
) -> anyhow::Result<CycleReport> {
    let store = Arc::new(FileStore::new(config.store_path()));
    store
        .is_available()
        .await
        .context("credential store unavailable")?;

    let scheduler = build_scheduler(config, store, executor)?;
    Ok(scheduler.run_cycle().await)
}

/// Fails when a cycle hit lookup errors or failed renewals.
pub fn ensure_clean(report: &CycleReport) -> anyhow::Result<()> {
    if report.errors > 0 {
        bail!(
            "check finished with {} error(s), {} failed renewal(s)",
            report.errors,
            report.failed
        );
    }
    Ok(())
}

pub async fn revoke(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let executor = build_executor(&config)?;
    revoke_with(&config, &executor, name).await
}

/// Revoke `name`'s credential upstream, then drop it from the store.
/// The stored secret is kept when revocation fails.
pub async fn revoke_with(
    config: &TokenwardConfig,
    executor: &dyn TokenExecutor,
    name: &str,
) -> anyhow::Result<()> {
    let connection = config
        .connections
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow!("unknown connection: {name}"))?;

    let store = FileStore::new(config.store_path());
    let Some(secret) = store.get(name).await? else {
        bail!("no credential stored for {name}");
    };

    executor
        .revoke(connection, &secret)
        .await
        .with_context(|| format!("failed to revoke credential for {name}"))?;
    store.delete(name).await?;

    info!(connection = %name, "credential revoked and removed");
    Ok(())
}

pub fn load_config(path: &Path) -> anyhow::Result<TokenwardConfig> {
    TokenwardConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn build_scheduler(
    config: &TokenwardConfig,
    store: Arc<dyn CredentialStore>,
    executor: Arc<dyn TokenExecutor>,
) -> anyhow::Result<Scheduler> {
    let scheduler_config = config
        .scheduler_config()
        .context("invalid scheduler configuration")?;

    Ok(Scheduler::new(
        scheduler_config,
        config.connections.clone(),
        store,
        executor,
        build_notifier(config),
        HealthAggregator::new(),
    ))
}

fn build_executor(config: &TokenwardConfig) -> anyhow::Result<VaultCliExecutor> {
    let timeout = config
        .executor_timeout()
        .context("invalid executor configuration")?;
    Ok(VaultCliExecutor::new(config.executor_binary(), timeout))
}

fn build_notifier(config: &TokenwardConfig) -> Arc<dyn Notifier> {
    if !config.notifications_enabled() {
        return Arc::new(LogNotifier);
    }
    let command = config
        .notifications
        .command
        .as_deref()
        .unwrap_or(DEFAULT_NOTIFY_COMMAND);
    match CommandNotifier::from_command_line(command) {
        Some(notifier) => Arc::new(notifier),
        None => {
            warn!("notifications enabled with an empty command, logging instead");
            Arc::new(LogNotifier)
        }
    }
}
