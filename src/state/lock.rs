use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StateError;

/// Who holds the run lock, and since when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub pid: u32,
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current(operation: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            holder: format!("{user}@{host}"),
            pid: std::process::id(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        }
    }

    /// Stands in for a lock file that exists but cannot be parsed, such as
    /// one left empty by a run that died right after creating it.
    fn unreadable(acquired_at: DateTime<Utc>) -> Self {
        Self {
            holder: "unknown".to_string(),
            pid: 0,
            operation: "unknown".to_string(),
            acquired_at,
        }
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        age.to_std().is_ok_and(|age| age > stale_after)
    }
}

/// Reads the lock file. A file that exists but does not parse still counts
/// as held, dated by its modification time.
pub(super) async fn read_lock(path: &Path) -> Result<Option<LockInfo>, StateError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path)(e)),
    };
    match serde_json::from_str(&content) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "lock file is unreadable");
            let modified = fs::metadata(path)
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Ok(Some(LockInfo::unreadable(modified)))
        }
    }
}

/// RAII guard for the run lock. Dropping it without `release` still removes
/// the lock file.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl StateLock {
    pub(super) async fn acquire(
        path: PathBuf,
        operation: &str,
        stale_after: Duration,
    ) -> Result<Self, StateError> {
        let info = LockInfo::current(operation);
        let content = serde_json::to_string_pretty(&info)?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let held = read_lock(&path).await?.ok_or_else(|| {
                    StateError::io(&path)(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "lock file vanished while being inspected",
                    ))
                })?;
                let stale = held.is_stale(stale_after);
                if stale {
                    tracing::warn!(holder = %held.holder, acquired_at = %held.acquired_at, "found stale lock");
                }
                return Err(StateError::LockHeld {
                    holder: held.holder,
                    operation: held.operation,
                    acquired_at: held.acquired_at,
                    stale,
                });
            }
            Err(e) => return Err(StateError::io(&path)(e)),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(StateError::io(&path))?;
        file.flush().await.map_err(StateError::io(&path))?;

        tracing::debug!(operation, holder = %info.holder, "acquired state lock");
        Ok(Self {
            path,
            info,
            released: false,
        })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub async fn release(mut self) -> Result<(), StateError> {
        if !self.released {
            match fs::remove_file(&self.path).await {
                Ok(()) => tracing::debug!("released state lock"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StateError::io(&self.path)(e)),
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
