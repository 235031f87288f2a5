//! Token executor backed by the `vault` command-line client.
//!
//! The secret is handed to the child through `VAULT_TOKEN`, never on the
//! command line. Every call is bounded by the configured timeout and the
//! child is killed if the call is abandoned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use tokenward_core::{
    Connection, ExecutorError, ExecutorResult, RenewOutcome, TokenExecutor, TokenStatus,
};

pub struct VaultCliExecutor {
    binary: String,
    timeout: Duration,
}

impl VaultCliExecutor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Binary used for this connection; the per-connection override wins.
    pub fn binary_for<'a>(&'a self, connection: &'a Connection) -> &'a str {
        connection.binary.as_deref().unwrap_or(&self.binary)
    }

    async fn exec(
        &self,
        connection: &Connection,
        secret: &str,
        args: &[&str],
    ) -> ExecutorResult<Vec<u8>> {
        let binary = self.binary_for(connection);
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .env("VAULT_TOKEN", secret)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(addr) = &connection.address {
            cmd.env("VAULT_ADDR", addr);
        }

        debug!(connection = %connection.name, %binary, ?args, "running executor");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExecutorError::BinaryNotFound(binary.to_string()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ExecutorError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(ExecutorError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl TokenExecutor for VaultCliExecutor {
    async fn probe(&self, connection: &Connection) -> ExecutorResult<()> {
        let binary = self.binary_for(connection);
        match resolve_binary(binary) {
            Some(path) => {
                debug!(connection = %connection.name, path = %path.display(), "executor resolved");
                Ok(())
            }
            None => Err(ExecutorError::BinaryNotFound(binary.to_string())),
        }
    }

    async fn lookup(&self, connection: &Connection, secret: &str) -> ExecutorResult<TokenStatus> {
        let stdout = self
            .exec(connection, secret, &["token", "lookup", "-format=json"])
            .await?;
        parse_lookup(&stdout)
    }

    async fn renew(&self, connection: &Connection, secret: &str) -> ExecutorResult<RenewOutcome> {
        let stdout = self
            .exec(connection, secret, &["token", "renew", "-format=json"])
            .await?;
        parse_renew(&stdout)
    }

    async fn revoke(&self, connection: &Connection, secret: &str) -> ExecutorResult<()> {
        self.exec(connection, secret, &["token", "revoke", "-self"])
            .await
            .map(|_| ())
    }
}

/// Locate an executable. Names containing a path separator are taken as-is.
pub fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|p| p.is_file())
}

#[derive(Deserialize)]
struct LookupResponse {
    data: LookupData,
}

#[derive(Deserialize)]
struct LookupData {
    #[serde(default)]
    ttl: i64,
    #[serde(default)]
    creation_ttl: i64,
    #[serde(default)]
    renewable: bool,
}

#[derive(Deserialize)]
struct RenewResponse {
    auth: RenewAuth,
}

#[derive(Deserialize)]
struct RenewAuth {
    #[serde(default)]
    client_token: Option<String>,
    #[serde(default)]
    lease_duration: i64,
    #[serde(default)]
    renewable: bool,
}

/// Parse `vault token lookup -format=json` output.
pub fn parse_lookup(stdout: &[u8]) -> ExecutorResult<TokenStatus> {
    let resp: LookupResponse =
        serde_json::from_slice(stdout).map_err(|e| ExecutorError::Parse(e.to_string()))?;
    Ok(TokenStatus {
        ttl_secs: resp.data.ttl,
        creation_ttl_secs: resp.data.creation_ttl,
        renewable: resp.data.renewable,
    })
}

/// Parse `vault token renew -format=json` output.
pub fn parse_renew(stdout: &[u8]) -> ExecutorResult<RenewOutcome> {
    let resp: RenewResponse =
        serde_json::from_slice(stdout).map_err(|e| ExecutorError::Parse(e.to_string()))?;
    Ok(RenewOutcome {
        new_secret: resp.auth.client_token.filter(|t| !t.is_empty()),
        new_ttl_secs: resp.auth.lease_duration,
        renewable: resp.auth.renewable,
    })
}
