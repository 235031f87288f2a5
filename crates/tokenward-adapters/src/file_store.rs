//! File-backed credential store.
//!
//! Secrets live in a single JSON object keyed by connection name. Every
//! write replaces the whole file through a temp file and a rename, so a
//! crash never leaves a half-written store behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use tokenward_core::{CredentialStore, StoreError, StoreResult};

type Secrets = BTreeMap<String, String>;

pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StoreResult<Secrets> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Secrets::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Secrets::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, secrets: &Secrets) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(secrets)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let written = async {
            write_private(&tmp, &json).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), entries = secrets.len(), "credential store written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.load().await?.remove(name).filter(|s| !s.is_empty()))
    }

    async fn set(&self, name: &str, secret: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut secrets = self.load().await?;
        secrets.insert(name.to_string(), secret.to_string());
        self.save(&secrets).await
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut secrets = self.load().await?;
        if secrets.remove(name).is_none() {
            return Ok(false);
        }
        self.save(&secrets).await?;
        Ok(true)
    }

    async fn is_available(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        self.load().await.map(|_| ())
    }
}

/// Write `bytes` to a freshly created file that is owner-only from the start.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // A leftover file would keep its old mode, so never reuse it.
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
