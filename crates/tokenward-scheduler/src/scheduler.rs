//! Scheduler: the renewal control loop.
//!
//! The `Scheduler`:
//! - Runs one check cycle immediately on start, then one per interval tick
//! - Walks every configured connection sequentially per cycle
//! - Renews credentials the policy flags, honouring per-connection backoff
//! - Reports counters to the shared `HealthAggregator`
//! - Exits on stop request, parent cancellation, or SIGINT/SIGTERM

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tokenward_core::{
    Connection, CredentialStore, Notifier, RenewOutcome, SchedulerConfig, TokenExecutor,
    TokenStatus, format_duration,
};
use tokenward_metrics::HealthAggregator;

use crate::backoff::BackoffTracker;
use crate::error::{SchedulerError, SchedulerResult};

/// What happened to a single connection during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Nothing stored under this connection's name.
    NoCredential,
    /// The executor cannot serve this connection right now.
    ExecutorUnavailable,
    /// No renewal needed yet.
    Healthy { ttl: Duration },
    /// Renewal needed but the issuer forbids it. Needs a human.
    NotRenewable,
    /// Renewal needed but the connection is still cooling down.
    BackedOff,
    Renewed { new_ttl: Duration },
    RenewalFailed { retry_in: Duration },
}

/// Summary of one check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Connections with a retrievable credential.
    pub managed: u64,
    pub renewed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl CycleReport {
    fn record(&mut self, outcome: &ConnectionOutcome) {
        if *outcome != ConnectionOutcome::NoCredential {
            self.managed += 1;
        }
        match outcome {
            ConnectionOutcome::Renewed { .. } => self.renewed += 1,
            ConnectionOutcome::RenewalFailed { .. } => {
                self.failed += 1;
                self.errors += 1;
            }
            ConnectionOutcome::Healthy { .. } => {}
            ConnectionOutcome::NoCredential
            | ConnectionOutcome::ExecutorUnavailable
            | ConnectionOutcome::NotRenewable
            | ConnectionOutcome::BackedOff => self.skipped += 1,
        }
    }
}

/// Keeps stored credentials alive by renewing them before they expire.
pub struct Scheduler {
    config: SchedulerConfig,
    connections: Vec<Connection>,
    store: Arc<dyn CredentialStore>,
    executor: Arc<dyn TokenExecutor>,
    notifier: Arc<dyn Notifier>,
    health: HealthAggregator,
    backoff: BackoffTracker,
    /// `Some` while running; holds the stop signal for the active run.
    lifecycle: Mutex<Option<watch::Sender<bool>>>,
    /// Flipped to `true` when a run ends so auxiliary listeners shut down.
    listeners: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        connections: Vec<Connection>,
        store: Arc<dyn CredentialStore>,
        executor: Arc<dyn TokenExecutor>,
        notifier: Arc<dyn Notifier>,
        health: HealthAggregator,
    ) -> Self {
        let backoff = BackoffTracker::new(config.initial_backoff, config.max_backoff);
        let (listeners, _) = watch::channel(false);
        Self {
            config,
            connections,
            store,
            executor,
            notifier,
            health,
            backoff,
            lifecycle: Mutex::new(None),
            listeners,
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn health(&self) -> &HealthAggregator {
        &self.health
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Receiver that flips to `true` whenever a run ends, on any exit path.
    ///
    /// Auxiliary listeners such as the health server shut down on it.
    pub fn listener_shutdown(&self) -> watch::Receiver<bool> {
        self.listeners.subscribe()
    }

    /// Ask the running loop to exit. Returns `false` if nothing is running.
    ///
    /// The loop exits at the next iteration boundary; an in-flight external
    /// call is allowed to finish first.
    pub fn stop(&self) -> bool {
        match self.lifecycle.lock().as_ref() {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Run the renewal loop until stopped.
    ///
    /// Exits on `stop()`, when `cancel` turns `true` or its sender is
    /// dropped, or on SIGINT/SIGTERM. Fails immediately with
    /// `AlreadyRunning` if another run is active, and with
    /// `StoreUnavailable` before any cycle if the store is unusable.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> SchedulerResult<()> {
        let mut stop = self.begin()?;
        let mut guard = RunGuard {
            scheduler: self,
            marker: None,
        };
        self.listeners.send_replace(false);
        let mut signals = TerminateSignals::install();

        if *cancel.borrow_and_update() {
            info!("cancelled before start");
            return Ok(());
        }

        if let Err(source) = self.store.is_available().await {
            error!(error = %source, "credential store unavailable, not starting");
            return Err(SchedulerError::StoreUnavailable(source));
        }

        if let Some(path) = &self.config.pid_file {
            write_marker(path)?;
            guard.marker = Some(path.clone());
        }

        let interval = self.config.check_interval;
        info!(
            connections = self.connections.len(),
            interval = %format_duration(interval),
            "renewal scheduler started"
        );

        // First check runs right away rather than after a full interval.
        self.run_cycle().await;

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("stop requested");
                    break;
                }
                // Err means the parent dropped its sender.
                _ = async { cancel.wait_for(|cancelled| *cancelled).await.map(|_| ()) } => {
                    info!("parent cancelled");
                    break;
                }
                signal = signals.recv() => {
                    info!(%signal, "termination signal received");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        Ok(())
    }

    /// Check every connection once and report the cycle to the aggregator.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for conn in &self.connections {
            match self.check_connection(conn).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    if e.credential_found() {
                        report.managed += 1;
                    }
                    report.errors += 1;
                    self.health.record_error().await;
                    if matches!(e, SchedulerError::StoreWrite { .. }) {
                        error!(connection = %conn.name, error = %e, "rotated credential not persisted");
                    } else {
                        warn!(connection = %conn.name, error = %e, "connection check failed");
                    }
                }
            }
        }

        self.health.record_check(report.managed).await;
        info!(
            managed = report.managed,
            renewed = report.renewed,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "check cycle complete"
        );
        report
    }

    /// Check a single connection, renewing it if the policy says so.
    ///
    /// Renewal failures are handled here (backoff, counter, notification)
    /// and reported as `RenewalFailed`. Store and lookup errors are
    /// returned to the caller.
    pub async fn check_connection(&self, conn: &Connection) -> SchedulerResult<ConnectionOutcome> {
        let name = conn.name.as_str();

        let secret = match self.store.get(name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                debug!(connection = %name, "no stored credential");
                return Ok(ConnectionOutcome::NoCredential);
            }
            Err(source) => {
                return Err(SchedulerError::StoreRead {
                    connection: name.to_string(),
                    source,
                });
            }
        };

        if let Err(e) = self.executor.probe(conn).await {
            debug!(connection = %name, error = %e, "executor unavailable, skipping");
            return Ok(ConnectionOutcome::ExecutorUnavailable);
        }

        let status = self
            .executor
            .lookup(conn, &secret)
            .await
            .map_err(|source| SchedulerError::Lookup {
                connection: name.to_string(),
                source,
            })?;

        if !self.config.policy.needs_renewal(&status) {
            debug!(connection = %name, ttl_secs = status.ttl_secs, "credential healthy");
            return Ok(ConnectionOutcome::Healthy { ttl: status.ttl() });
        }

        if !status.renewable {
            warn!(
                connection = %name,
                ttl_secs = status.ttl_secs,
                "credential needs renewal but is not renewable, manual action required"
            );
            return Ok(ConnectionOutcome::NotRenewable);
        }

        if self.backoff.should_skip(name, Instant::now()) {
            debug!(connection = %name, "renewal backed off");
            return Ok(ConnectionOutcome::BackedOff);
        }

        info!(connection = %name, ttl_secs = status.ttl_secs, "renewing credential");
        match self.executor.renew(conn, &secret).await {
            Ok(outcome) => self.complete_renewal(conn, &secret, &status, &outcome).await,
            Err(e) => {
                let retry_in = self.backoff.record_failure(name, Instant::now());
                self.health.record_error().await;
                error!(
                    connection = %name,
                    error = %e,
                    retry_in = %format_duration(retry_in),
                    "renewal failed"
                );
                if let Err(ne) = self.notifier.notify_failure(name, &e.to_string()).await {
                    warn!(connection = %name, error = %ne, "failure notification not delivered");
                }
                Ok(ConnectionOutcome::RenewalFailed { retry_in })
            }
        }
    }

    async fn complete_renewal(
        &self,
        conn: &Connection,
        secret: &str,
        status: &TokenStatus,
        outcome: &RenewOutcome,
    ) -> SchedulerResult<ConnectionOutcome> {
        let name = conn.name.as_str();
        self.backoff.record_success(name);
        self.health.record_renewal().await;

        let mut current = secret;
        if let Some(rotated) = outcome.rotated_secret(secret) {
            self.store
                .set(name, rotated)
                .await
                .map_err(|source| SchedulerError::StoreWrite {
                    connection: name.to_string(),
                    source,
                })?;
            debug!(connection = %name, "rotated credential written back");
            current = rotated;
        }

        // Known approximation: if the re-lookup fails, report the creation
        // TTL from before the renewal.
        let new_ttl = match self.executor.lookup(conn, current).await {
            Ok(fresh) => fresh.ttl(),
            Err(e) => {
                debug!(connection = %name, error = %e, "post-renewal lookup failed, using creation TTL");
                status.creation_ttl()
            }
        };

        info!(connection = %name, new_ttl = %format_duration(new_ttl), "credential renewed");
        if let Err(e) = self.notifier.notify_renewal(name, new_ttl).await {
            warn!(connection = %name, error = %e, "renewal notification not delivered");
        }

        Ok(ConnectionOutcome::Renewed { new_ttl })
    }

    fn begin(&self) -> SchedulerResult<watch::Receiver<bool>> {
        let mut slot = self.lifecycle.lock();
        if slot.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);
        Ok(rx)
    }
}

/// Cleanup that must happen however `run` exits.
struct RunGuard<'a> {
    scheduler: &'a Scheduler,
    marker: Option<PathBuf>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.listeners.send_replace(true);
        if let Some(path) = self.marker.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove pid file");
            }
        }
        self.scheduler.lifecycle.lock().take();
        info!("renewal scheduler stopped");
    }
}

fn write_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
}

/// OS termination signals for one run.
///
/// Handlers are registered on construction, so a signal that arrives while
/// the store check or the first cycle is still in progress is buffered and
/// seen at the next loop boundary.
struct TerminateSignals {
    #[cfg(unix)]
    term: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    int: Option<tokio::signal::unix::Signal>,
}

impl TerminateSignals {
    fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let register = |kind: SignalKind, name: &'static str| match signal(kind) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(signal = name, error = %e, "failed to install signal handler");
                    None
                }
            };
            Self {
                term: register(SignalKind::terminate(), "SIGTERM"),
                int: register(SignalKind::interrupt(), "SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Resolves with the signal name once SIGINT or SIGTERM is received.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(()) = recv_or_pending(&mut self.term) => "SIGTERM",
                Some(()) = recv_or_pending(&mut self.int) => "SIGINT",
                else => std::future::pending::<&'static str>().await,
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install interrupt handler");
                std::future::pending::<()>().await;
            }
            "ctrl-c"
        }
    }
}

#[cfg(unix)]
async fn recv_or_pending(stream: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use tokenward_core::{
        ExecutorError, ExecutorResult, NotifyError, NotifyResult, RenewalPolicy, StoreError,
        StoreResult,
    };

    // ── Fakes ───────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeStore {
        secrets: Mutex<HashMap<String, String>>,
        unavailable: bool,
        fail_get: HashSet<String>,
        fail_set: bool,
    }

    impl FakeStore {
        fn with(entries: &[(&str, &str)]) -> Self {
            let store = Self::default();
            for (k, v) in entries {
                store.secrets.lock().insert(k.to_string(), v.to_string());
            }
            store
        }

        fn secret(&self, name: &str) -> Option<String> {
            self.secrets.lock().get(name).cloned()
        }
    }

    #[async_trait]
    impl CredentialStore for FakeStore {
        async fn get(&self, name: &str) -> StoreResult<Option<String>> {
            if self.fail_get.contains(name) {
                return Err(StoreError::Corrupt("bad entry".to_string()));
            }
            Ok(self.secrets.lock().get(name).cloned())
        }

        async fn set(&self, name: &str, secret: &str) -> StoreResult<()> {
            if self.fail_set {
                return Err(StoreError::Unavailable("read-only".to_string()));
            }
            self.secrets.lock().insert(name.to_string(), secret.to_string());
            Ok(())
        }

        async fn delete(&self, name: &str) -> StoreResult<bool> {
            Ok(self.secrets.lock().remove(name).is_some())
        }

        async fn is_available(&self) -> StoreResult<()> {
            if self.unavailable {
                Err(StoreError::Unavailable("keyring locked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        /// Scripted lookups per connection; the last entry repeats.
        lookups: Mutex<HashMap<String, VecDeque<ExecutorResult<TokenStatus>>>>,
        /// Scripted renewals per connection; missing means success.
        renewals: Mutex<HashMap<String, VecDeque<ExecutorResult<RenewOutcome>>>>,
        unreachable: HashSet<String>,
        renew_calls: AtomicUsize,
        lookup_secrets: Mutex<Vec<String>>,
        renew_entered: Arc<Notify>,
        renew_gate: Option<Arc<Notify>>,
    }

    impl FakeExecutor {
        fn lookup_returns(&self, name: &str, results: Vec<ExecutorResult<TokenStatus>>) {
            self.lookups.lock().insert(name.to_string(), results.into());
        }

        fn renew_returns(&self, name: &str, results: Vec<ExecutorResult<RenewOutcome>>) {
            self.renewals.lock().insert(name.to_string(), results.into());
        }

        fn renew_calls(&self) -> usize {
            self.renew_calls.load(Ordering::SeqCst)
        }
    }

    fn copy_result<T: Clone>(r: &ExecutorResult<T>) -> ExecutorResult<T> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(ExecutorError::Parse(e.to_string())),
        }
    }

    #[async_trait]
    impl TokenExecutor for FakeExecutor {
        async fn probe(&self, connection: &Connection) -> ExecutorResult<()> {
            if self.unreachable.contains(&connection.name) {
                Err(ExecutorError::BinaryNotFound("vault".to_string()))
            } else {
                Ok(())
            }
        }

        async fn lookup(&self, connection: &Connection, secret: &str) -> ExecutorResult<TokenStatus> {
            self.lookup_secrets.lock().push(secret.to_string());
            let mut lookups = self.lookups.lock();
            let queue = lookups
                .get_mut(&connection.name)
                .ok_or_else(|| ExecutorError::Parse("no scripted lookup".to_string()))?;
            if queue.len() > 1 {
                queue.pop_front().unwrap_or_else(|| Err(ExecutorError::Parse("empty".into())))
            } else {
                queue
                    .front()
                    .map(copy_result)
                    .unwrap_or_else(|| Err(ExecutorError::Parse("empty".into())))
            }
        }

        async fn renew(&self, connection: &Connection, secret: &str) -> ExecutorResult<RenewOutcome> {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            self.renew_entered.notify_one();
            if let Some(gate) = &self.renew_gate {
                gate.notified().await;
            }
            let scripted = self
                .renewals
                .lock()
                .get_mut(&connection.name)
                .and_then(|q| q.pop_front());
            scripted.unwrap_or_else(|| {
                Ok(RenewOutcome {
                    new_secret: Some(secret.to_string()),
                    new_ttl_secs: 3600,
                    renewable: true,
                })
            })
        }

        async fn revoke(&self, _connection: &Connection, _secret: &str) -> ExecutorResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        renewals: Mutex<Vec<(String, Duration)>>,
        failures: Mutex<Vec<String>>,
        broken: bool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify_renewal(&self, name: &str, new_ttl: Duration) -> NotifyResult<()> {
            self.renewals.lock().push((name.to_string(), new_ttl));
            if self.broken {
                return Err(NotifyError::Command("no display".to_string()));
            }
            Ok(())
        }

        async fn notify_failure(&self, name: &str, _error: &str) -> NotifyResult<()> {
            self.failures.lock().push(name.to_string());
            if self.broken {
                return Err(NotifyError::Command("no display".to_string()));
            }
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            check_interval: Duration::from_secs(3600),
            policy: RenewalPolicy::new(Duration::from_secs(300), 0.75),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(900),
            pid_file: None,
        }
    }

    fn status(ttl: i64, creation: i64, renewable: bool) -> ExecutorResult<TokenStatus> {
        Ok(TokenStatus {
            ttl_secs: ttl,
            creation_ttl_secs: creation,
            renewable,
        })
    }

    fn renew_failed() -> ExecutorResult<RenewOutcome> {
        Err(ExecutorError::CommandFailed {
            status: "exit status: 2".to_string(),
            stderr: "permission denied".to_string(),
        })
    }

    struct Harness {
        scheduler: Arc<Scheduler>,
        store: Arc<FakeStore>,
        executor: Arc<FakeExecutor>,
        notifier: Arc<FakeNotifier>,
    }

    fn harness_with(
        config: SchedulerConfig,
        names: &[&str],
        store: FakeStore,
        executor: FakeExecutor,
        notifier: FakeNotifier,
    ) -> Harness {
        let store = Arc::new(store);
        let executor = Arc::new(executor);
        let notifier = Arc::new(notifier);
        let connections = names.iter().map(|n| Connection::new(*n)).collect();
        let scheduler = Arc::new(Scheduler::new(
            config,
            connections,
            store.clone(),
            executor.clone(),
            notifier.clone(),
            HealthAggregator::new(),
        ));
        Harness {
            scheduler,
            store,
            executor,
            notifier,
        }
    }

    fn harness(names: &[&str], store: FakeStore, executor: FakeExecutor) -> Harness {
        harness_with(test_config(), names, store, executor, FakeNotifier::default())
    }

    fn conn(name: &str) -> Connection {
        Connection::new(name)
    }

    // ── Per-connection checks ───────────────────────────────────

    #[tokio::test]
    async fn renews_token_below_min_ttl() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true), status(3600, 3600, true)]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert_eq!(
            outcome,
            ConnectionOutcome::Renewed {
                new_ttl: Duration::from_secs(3600)
            }
        );
        let snap = h.scheduler.health().snapshot().await;
        assert_eq!(snap.renewals_total, 1);
        assert_eq!(snap.errors_total, 0);
        assert!(h.scheduler.backoff().record("prod").is_none());
        assert_eq!(
            h.notifier.renewals.lock().as_slice(),
            &[("prod".to_string(), Duration::from_secs(3600))]
        );
    }

    #[tokio::test]
    async fn healthy_token_is_left_alone() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(3500, 3600, true)]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert_eq!(
            outcome,
            ConnectionOutcome::Healthy {
                ttl: Duration::from_secs(3500)
            }
        );
        assert_eq!(h.executor.renew_calls(), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_skipped_without_error() {
        let h = harness(&["prod"], FakeStore::default(), FakeExecutor::default());

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert_eq!(outcome, ConnectionOutcome::NoCredential);
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 0);
    }

    #[tokio::test]
    async fn store_read_error_is_returned() {
        let mut store = FakeStore::with(&[("prod", "s.one")]);
        store.fail_get.insert("prod".to_string());
        let h = harness(&["prod"], store, FakeExecutor::default());

        let result = h.scheduler.check_connection(&conn("prod")).await;

        assert!(matches!(result, Err(SchedulerError::StoreRead { .. })));
    }

    #[tokio::test]
    async fn unreachable_executor_is_skipped_without_error() {
        let mut executor = FakeExecutor::default();
        executor.unreachable.insert("prod".to_string());
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.managed, 1);
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 0);
    }

    #[tokio::test]
    async fn lookup_failure_is_returned() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![Err(ExecutorError::Timeout(Duration::from_secs(30)))]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let result = h.scheduler.check_connection(&conn("prod")).await;

        assert!(matches!(result, Err(SchedulerError::Lookup { .. })));
        assert_eq!(h.executor.renew_calls(), 0);
    }

    #[tokio::test]
    async fn non_renewable_token_is_never_renewed() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, false)]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        for _ in 0..3 {
            let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();
            assert_eq!(outcome, ConnectionOutcome::NotRenewable);
        }

        assert_eq!(h.executor.renew_calls(), 0);
        assert!(h.scheduler.backoff().is_empty());
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 0);
    }

    #[tokio::test]
    async fn rotated_secret_is_written_back_before_relookup() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true), status(7200, 7200, true)]);
        executor.renew_returns(
            "prod",
            vec![Ok(RenewOutcome {
                new_secret: Some("s.two".to_string()),
                new_ttl_secs: 7200,
                renewable: true,
            })],
        );
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert_eq!(
            outcome,
            ConnectionOutcome::Renewed {
                new_ttl: Duration::from_secs(7200)
            }
        );
        assert_eq!(h.store.secret("prod").as_deref(), Some("s.two"));
        assert_eq!(
            h.executor.lookup_secrets.lock().as_slice(),
            &["s.one".to_string(), "s.two".to_string()]
        );
    }

    #[tokio::test]
    async fn store_write_failure_is_a_distinct_error() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        let rotated = || {
            Ok(RenewOutcome {
                new_secret: Some("s.two".to_string()),
                new_ttl_secs: 3600,
                renewable: true,
            })
        };
        executor.renew_returns("prod", vec![rotated(), rotated()]);
        let mut store = FakeStore::with(&[("prod", "s.one")]);
        store.fail_set = true;
        let h = harness(&["prod"], store, executor);

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.errors, 1);
        assert_eq!(report.managed, 1);
        assert_eq!(report.failed, 0);
        // The issuer did renew, so no backoff and no failure notification.
        assert!(h.scheduler.backoff().is_empty());
        assert!(h.notifier.failures.lock().is_empty());
        assert!(h.notifier.renewals.lock().is_empty());

        let result = h.scheduler.check_connection(&conn("prod")).await;
        assert!(matches!(result, Err(SchedulerError::StoreWrite { .. })));
    }

    #[tokio::test]
    async fn failed_relookup_falls_back_to_creation_ttl() {
        let executor = FakeExecutor::default();
        executor.lookup_returns(
            "prod",
            vec![
                status(100, 1800, true),
                Err(ExecutorError::Timeout(Duration::from_secs(30))),
            ],
        );
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert_eq!(
            outcome,
            ConnectionOutcome::Renewed {
                new_ttl: Duration::from_secs(1800)
            }
        );
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 0);
    }

    #[tokio::test]
    async fn notifier_errors_are_swallowed() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        let notifier = FakeNotifier {
            broken: true,
            ..FakeNotifier::default()
        };
        let h = harness_with(
            test_config(),
            &["prod"],
            FakeStore::with(&[("prod", "s.one")]),
            executor,
            notifier,
        );

        let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();

        assert!(matches!(outcome, ConnectionOutcome::Renewed { .. }));
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 0);
    }

    // ── Backoff through the cycle ───────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_back_off_exponentially() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        executor.renew_returns("prod", vec![renew_failed(), renew_failed(), renew_failed()]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let mut delays = Vec::new();
        for _ in 0..3 {
            match h.scheduler.check_connection(&conn("prod")).await.unwrap() {
                ConnectionOutcome::RenewalFailed { retry_in } => {
                    delays.push(retry_in.as_secs());
                    tokio::time::advance(retry_in).await;
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(delays, vec![30, 60, 120]);
        assert_eq!(h.scheduler.health().snapshot().await.errors_total, 3);
        assert_eq!(h.notifier.failures.lock().len(), 3);
        assert_eq!(h.scheduler.backoff().record("prod").unwrap().failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backed_off_connection_is_skipped_until_retry() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        executor.renew_returns("prod", vec![renew_failed()]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let first = h.scheduler.check_connection(&conn("prod")).await.unwrap();
        assert!(matches!(first, ConnectionOutcome::RenewalFailed { .. }));

        let second = h.scheduler.check_connection(&conn("prod")).await.unwrap();
        assert_eq!(second, ConnectionOutcome::BackedOff);
        assert_eq!(h.executor.renew_calls(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        let third = h.scheduler.check_connection(&conn("prod")).await.unwrap();
        assert!(matches!(third, ConnectionOutcome::Renewed { .. }));
        assert!(h.scheduler.backoff().record("prod").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_backoff_to_initial_delay() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        executor.renew_returns(
            "prod",
            vec![
                renew_failed(),
                renew_failed(),
                Ok(RenewOutcome {
                    new_secret: None,
                    new_ttl_secs: 3600,
                    renewable: true,
                }),
                renew_failed(),
            ],
        );
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let outcome = h.scheduler.check_connection(&conn("prod")).await.unwrap();
            if let ConnectionOutcome::RenewalFailed { retry_in } = outcome {
                tokio::time::advance(retry_in).await;
            }
            outcomes.push(outcome);
        }

        assert_eq!(
            outcomes[3],
            ConnectionOutcome::RenewalFailed {
                retry_in: Duration::from_secs(30)
            }
        );
    }

    // ── Cycles ──────────────────────────────────────────────────

    #[tokio::test]
    async fn cycle_reports_managed_count_and_continues_past_errors() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("a", vec![status(100, 3600, true)]);
        executor.lookup_returns("b", vec![Err(ExecutorError::Parse("garbage".to_string()))]);
        executor.lookup_returns("c", vec![status(3500, 3600, true)]);
        let mut store = FakeStore::with(&[("a", "s.a"), ("b", "s.b"), ("c", "s.c"), ("e", "s.e")]);
        store.fail_get.insert("e".to_string());
        let h = harness(&["a", "b", "c", "d", "e"], store, executor);

        let report = h.scheduler.run_cycle().await;

        assert_eq!(
            report,
            CycleReport {
                managed: 3,
                renewed: 1,
                failed: 0,
                skipped: 1,
                errors: 2,
            }
        );
        let snap = h.scheduler.health().snapshot().await;
        assert_eq!(snap.tokens_managed, 3);
        assert_eq!(snap.renewals_total, 1);
        assert_eq!(snap.errors_total, 2);
        assert!(snap.last_check.is_some());
    }

    #[tokio::test]
    async fn empty_cycle_still_records_check() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report, CycleReport::default());
        assert!(h.scheduler.health().snapshot().await.last_check.is_some());
    }

    // ── Lifecycle ───────────────────────────────────────────────

    async fn wait_until_running(scheduler: &Scheduler) {
        while !scheduler.is_running() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn run_checks_immediately_and_stops_on_request() {
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });

        h.executor.renew_entered.notified().await;
        wait_until_running(&h.scheduler).await;
        assert!(h.scheduler.stop());
        handle.await.unwrap().unwrap();

        assert!(!h.scheduler.is_running());
        assert!(!h.scheduler.stop());
        assert_eq!(h.scheduler.health().snapshot().await.renewals_total, 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let mut a = tokio::spawn({
            let s = h.scheduler.clone();
            let rx = cancel_rx.clone();
            async move { s.run(rx).await }
        });
        let mut b = tokio::spawn({
            let s = h.scheduler.clone();
            let rx = cancel_rx.clone();
            async move { s.run(rx).await }
        });

        // The loser returns straight away; the winner keeps running.
        let (loser, first) = tokio::select! {
            r = &mut a => (0, r.unwrap()),
            r = &mut b => (1, r.unwrap()),
        };
        assert!(matches!(first, Err(SchedulerError::AlreadyRunning)));
        assert!(h.scheduler.is_running());

        let winner = if loser == 0 { b } else { a };
        assert!(h.scheduler.stop());
        winner.await.unwrap().unwrap();
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_renewal() {
        let gate = Arc::new(Notify::new());
        let executor = FakeExecutor {
            renew_gate: Some(gate.clone()),
            ..FakeExecutor::default()
        };
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        let h = harness(&["prod"], FakeStore::with(&[("prod", "s.one")]), executor);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });

        h.executor.renew_entered.notified().await;
        assert!(h.scheduler.stop());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(h.scheduler.is_running());

        gate.notify_one();
        handle.await.unwrap().unwrap();
        assert!(!h.scheduler.is_running());
        assert_eq!(h.scheduler.health().snapshot().await.renewals_total, 1);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_the_loop() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut listener = h.scheduler.listener_shutdown();

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });
        wait_until_running(&h.scheduler).await;

        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(!h.scheduler.is_running());
        listener.changed().await.unwrap();
        assert!(*listener.borrow());
    }

    #[tokio::test]
    async fn parent_sending_false_keeps_running() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });
        wait_until_running(&h.scheduler).await;

        cancel_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(h.scheduler.is_running());

        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn dropped_parent_sender_stops_the_loop() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });
        wait_until_running(&h.scheduler).await;

        drop(cancel_tx);
        handle.await.unwrap().unwrap();
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn unavailable_store_is_fatal_at_startup() {
        let store = FakeStore {
            unavailable: true,
            ..FakeStore::default()
        };
        let executor = FakeExecutor::default();
        executor.lookup_returns("prod", vec![status(100, 3600, true)]);
        let h = harness(&["prod"], store, executor);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let listener = h.scheduler.listener_shutdown();

        let result = h.scheduler.run(cancel_rx).await;

        assert!(matches!(result, Err(SchedulerError::StoreUnavailable(_))));
        assert!(!h.scheduler.is_running());
        assert!(*listener.borrow());
        assert!(h.scheduler.health().snapshot().await.last_check.is_none());
        assert_eq!(h.executor.renew_calls(), 0);
    }

    #[tokio::test]
    async fn pid_file_exists_only_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("run").join("tokenward.pid");
        let config = SchedulerConfig {
            pid_file: Some(pid_path.clone()),
            ..test_config()
        };
        let h = harness_with(
            config,
            &[],
            FakeStore::default(),
            FakeExecutor::default(),
            FakeNotifier::default(),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });
        while !pid_path.exists() {
            tokio::task::yield_now().await;
        }
        let contents = std::fs::read_to_string(&pid_path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        h.scheduler.stop();
        handle.await.unwrap().unwrap();
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn scheduler_can_restart_after_stop() {
        let h = harness(&[], FakeStore::default(), FakeExecutor::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        for _ in 0..2 {
            let scheduler = h.scheduler.clone();
            let rx = cancel_rx.clone();
            let handle = tokio::spawn(async move { scheduler.run(rx).await });
            wait_until_running(&h.scheduler).await;
            h.scheduler.stop();
            handle.await.unwrap().unwrap();
        }
        assert!(!h.scheduler.is_running());
    }
}
