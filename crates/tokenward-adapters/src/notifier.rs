//! Renewal notifiers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use tokenward_core::{Notifier, NotifyError, NotifyResult, format_duration};

const TITLE: &str = "tokenward";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

fn renewal_message(name: &str, new_ttl: Duration) -> String {
    format!("Renewed credential for {name} (valid for {})", format_duration(new_ttl))
}

fn failure_message(name: &str, error: &str) -> String {
    format!("Renewal failed for {name}: {error}")
}

/// Emits notifications as log events only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_renewal(&self, name: &str, new_ttl: Duration) -> NotifyResult<()> {
        info!(connection = %name, ttl = %format_duration(new_ttl), "credential renewed");
        Ok(())
    }

    async fn notify_failure(&self, name: &str, error: &str) -> NotifyResult<()> {
        warn!(connection = %name, %error, "credential renewal failed");
        Ok(())
    }
}

/// Runs a desktop notification command as `<program> [args..] <title> <body>`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    /// Build from a command line such as `notify-send -u critical`.
    /// Returns `None` for a blank command.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout: COMMAND_TIMEOUT,
        })
    }

    async fn send(&self, body: &str) -> NotifyResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(TITLE)
            .arg(body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                NotifyError::Command(format!("{} timed out after {:?}", self.program, self.timeout))
            })??;

        if !output.status.success() {
            return Err(NotifyError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(program = %self.program, "notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify_renewal(&self, name: &str, new_ttl: Duration) -> NotifyResult<()> {
        self.send(&renewal_message(name, new_ttl)).await
    }

    async fn notify_failure(&self, name: &str, error: &str) -> NotifyResult<()> {
        self.send(&failure_message(name, error)).await
    }
}
