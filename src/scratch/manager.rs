//! Resource Lifecycle Manager
//!
//! Creates one scratch directory per request and guarantees its removal.
//! Every acquired [`ScratchDirectory`] is consumed by exactly one of
//! [`ScratchManager::schedule_delayed_cleanup`] or
//! [`ScratchManager::cleanup_immediately`]. A directory dropped without either
//! is removed synchronously and logged as a leak.
//!
//! Delayed cleanups are tracked tasks; [`ScratchManager::shutdown`] cancels
//! their timers and removes their directories right away.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::cleanup::remove_dir_all_safe;

const CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("Failed to create scratch directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Scratch self-test failed: {0}")]
    SelfTest(String),
}

// ============================================================================
// Scratch Directory
// ============================================================================

/// Per-request scratch storage, owned until handed to a cleanup operation
#[derive(Debug)]
pub struct ScratchDirectory {
    path: Option<PathBuf>,
    request_id: String,
    created_at: DateTime<Utc>,
}

impl ScratchDirectory {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Where the uploaded file is persisted
    pub fn source_path(&self, filename: &str) -> PathBuf {
        self.path().join(filename)
    }

    /// Where the engine writes its artifacts
    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    fn take(mut self) -> Option<PathBuf> {
        self.path.take()
    }
}

impl Drop for ScratchDirectory {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            tracing::warn!(
                request_id = %self.request_id,
                path = %path.display(),
                "Scratch directory dropped without cleanup, removing now"
            );
            remove_dir_all_safe(&path);
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Scratch lifecycle statistics
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchStats {
    pub created: usize,
    pub removed: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ScratchManager {
    inner: Arc<ScratchInner>,
}

struct ScratchInner {
    root: PathBuf,
    delay: Duration,
    token: CancellationToken,
    tracker: TaskTracker,
    created: AtomicUsize,
    removed: AtomicUsize,
    pending: AtomicUsize,
    failed: AtomicUsize,
}

impl ScratchManager {
    pub fn new(root: impl Into<PathBuf>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(ScratchInner {
                root: root.into(),
                delay,
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                created: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Create a fresh, uniquely named directory for a request
    pub fn acquire(&self, request_id: &str, label: &str) -> Result<ScratchDirectory, ScratchError> {
        std::fs::create_dir_all(&self.inner.root).map_err(|source| ScratchError::Create {
            path: self.inner.root.clone(),
            source,
        })?;

        let mut attempt = 0;
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let path = self
                .inner
                .root
                .join(format!("parse_{}_{}_{}", label, request_id, &suffix[..12]));

            // create_dir fails on an existing path, so two requests never share one
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    self.inner.created.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(request_id, path = %path.display(), "Created scratch directory");
                    return Ok(ScratchDirectory {
                        path: Some(path),
                        request_id: request_id.to_string(),
                        created_at: Utc::now(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt + 1 < CREATE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(source) => return Err(ScratchError::Create { path, source }),
            }
        }
    }

    /// Remove `dir` after the configured delay without blocking the caller
    pub fn schedule_delayed_cleanup(&self, dir: ScratchDirectory) {
        let request_id = dir.request_id.clone();
        let Some(path) = dir.take() else {
            return;
        };

        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let token = self.inner.token.clone();
        let delay = self.inner.delay;

        self.inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(request_id = %request_id, "Flushing scheduled cleanup");
                }
                _ = tokio::time::sleep(delay) => {}
            }
            manager.remove(request_id, path).await;
            manager.inner.pending.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Remove `dir` now; used on the error path before responding
    pub async fn cleanup_immediately(&self, dir: ScratchDirectory) {
        let request_id = dir.request_id.clone();
        if let Some(path) = dir.take() {
            self.remove(request_id, path).await;
        }
    }

    async fn remove(&self, request_id: String, path: PathBuf) {
        let target = path.clone();
        let removed = tokio::task::spawn_blocking(move || remove_dir_all_safe(&target))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(request_id = %request_id, "Cleanup task failed: {}", e);
                false
            });

        if removed {
            self.inner.removed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(request_id = %request_id, path = %path.display(), "Removed scratch directory");
        } else {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Scheduled cleanups not yet run
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ScratchStats {
        ScratchStats {
            created: self.inner.created.load(Ordering::Relaxed),
            removed: self.inner.removed.load(Ordering::Relaxed),
            pending: self.pending(),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Create, write and remove a throwaway directory
    pub async fn self_test(&self) -> Result<(), ScratchError> {
        let dir = self.acquire("selftest", "health")?;
        let marker = dir.path().join("selftest.txt");
        let write = tokio::fs::write(&marker, b"ok").await;
        let path = dir.path().to_path_buf();
        self.cleanup_immediately(dir).await;

        write.map_err(|e| ScratchError::SelfTest(format!("write failed: {}", e)))?;
        if path.exists() {
            return Err(ScratchError::SelfTest(format!(
                "{} still exists after cleanup",
                path.display()
            )));
        }
        Ok(())
    }

    /// Run every scheduled cleanup now and wait for completion
    pub async fn shutdown(&self) {
        let pending = self.pending();
        if pending > 0 {
            tracing::info!(pending, "Flushing scheduled scratch cleanups...");
        }
        self.inner.token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_unique_directories() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_secs(60));

        let a = manager.acquire("abcd1234", "pipeline").unwrap();
        let b = manager.acquire("abcd1234", "pipeline").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("parse_pipeline_abcd1234_"));

        manager.cleanup_immediately(a).await;
        manager.cleanup_immediately(b).await;
        assert_eq!(manager.stats().removed, 2);
    }

    #[tokio::test]
    async fn test_immediate_cleanup() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_secs(60));
        let dir = manager.acquire("req", "pipeline").unwrap();
        std::fs::create_dir_all(dir.output_dir()).unwrap();
        std::fs::write(dir.source_path("a.pdf"), b"%PDF").unwrap();
        let path = dir.path().to_path_buf();

        manager.cleanup_immediately(dir).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delayed_cleanup_waits() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_millis(150));
        let dir = manager.acquire("req", "pipeline").unwrap();
        let path = dir.path().to_path_buf();

        manager.schedule_delayed_cleanup(dir);
        assert!(path.exists());
        assert_eq!(manager.pending(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!path.exists());
        assert_eq!(manager.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_secs(3600));
        let dir = manager.acquire("req", "pipeline").unwrap();
        let path = dir.path().to_path_buf();
        manager.schedule_delayed_cleanup(dir);

        manager.shutdown().await;
        assert!(!path.exists());
        assert_eq!(manager.pending(), 0);
    }

    #[tokio::test]
    async fn test_dropped_directory_is_removed() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_secs(60));
        let dir = manager.acquire("req", "pipeline").unwrap();
        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_self_test() {
        let root = TempDir::new().unwrap();
        let manager = ScratchManager::new(root.path(), Duration::from_secs(60));
        manager.self_test().await.unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_fails_under_a_file() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let manager = ScratchManager::new(&blocker, Duration::from_secs(60));
        assert!(matches!(
            manager.acquire("req", "pipeline"),
            Err(ScratchError::Create { .. })
        ));
    }
}
