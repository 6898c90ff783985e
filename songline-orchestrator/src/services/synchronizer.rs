//! Shared-storage synchronizer
//!
//! Stages run in separate processes and hand files to each other through a
//! shared directory. A file written by one stage may not be visible to the next
//! immediately, so every cross-process handoff goes through [`ArtifactWaiter`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Directory (under the shared root) where the separate service writes stems
pub const VOCAL_STEM_DIR: &str = "vocal_stems";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{} not visible after {waited:?}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("Cancelled while waiting for {}", .path.display())]
    Cancelled { path: PathBuf },
}

/// Waits until an artifact written by another process becomes visible
#[async_trait]
pub trait ArtifactWaiter: Send + Sync {
    async fn await_visible(
        &self,
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError>;
}

/// Polls the filesystem at a fixed interval
#[derive(Debug, Clone)]
pub struct PollingWaiter {
    poll_interval: Duration,
}

impl PollingWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl ArtifactWaiter for PollingWaiter {
    async fn await_visible(
        &self,
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled {
                    path: path.to_path_buf(),
                });
            }

            // Errors (permission, stale NFS handle) count as "not visible yet"
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                tracing::debug!(
                    path = %path.display(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Artifact visible"
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SyncError::Timeout {
                    path: path.to_path_buf(),
                    waited: now - started,
                });
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SyncError::Cancelled { path: path.to_path_buf() });
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

/// Layout of the shared directory
#[derive(Debug, Clone)]
pub struct SharedStorage {
    root: PathBuf,
}

impl SharedStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staged uploads live directly under the root
    pub fn input_path(&self, locator: &str) -> PathBuf {
        self.root.join(locator)
    }

    pub fn vocal_stem_dir(&self) -> PathBuf {
        self.root.join(VOCAL_STEM_DIR)
    }

    pub fn vocal_stem_path(&self, stem_name: &str) -> PathBuf {
        self.vocal_stem_dir().join(stem_name)
    }

    /// Create the root and stem directories if missing
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.vocal_stem_dir())
    }

    /// Remove a file, logging instead of failing when it cannot be removed
    pub async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove artifact: {}", e),
        }
    }
}

/// Check that a locator is a bare file name inside the shared directory
pub fn validate_locator(locator: &str) -> Result<(), String> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err("locator must not be empty".to_string());
    }
    if trimmed != locator {
        return Err("locator must not have surrounding whitespace".to_string());
    }
    if locator == "." || locator == ".." || locator.contains(['/', '\\']) {
        return Err(format!("locator '{}' must be a plain file name", locator));
    }
    Ok(())
}
