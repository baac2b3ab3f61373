//! Application state management

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::engine::ConverterFactory;
use crate::pool::{PoolError, WorkerPool};
use crate::scratch::ScratchManager;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to start worker pool: {0}")]
    PoolStart(#[from] PoolError),
}

/// Parse requests currently being handled, plus a running total
#[derive(Debug, Default)]
pub struct RequestCounter {
    active: AtomicUsize,
    total: AtomicU64,
}

impl RequestCounter {
    /// Count a request until the returned guard drops
    pub fn enter(&self) -> RequestGuard<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        RequestGuard(self)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

pub struct RequestGuard<'a>(&'a RequestCounter);

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    registry: Arc<BackendRegistry>,
    pool: WorkerPool,
    scratch: ScratchManager,
    dispatcher: Dispatcher,
    requests: RequestCounter,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new application state
    ///
    /// Starts the worker pool; every worker is bound to its device before
    /// this returns.
    pub fn new(config: Config, factory: Arc<dyn ConverterFactory>) -> Result<Self, StateError> {
        let registry = Arc::new(BackendRegistry::new(
            config.runtime.mode,
            Some(config.runtime.vlm_backend.as_str()),
            config.runtime.server_url.clone(),
        ));
        let pool = WorkerPool::start(&config.pool, factory)?;
        let scratch = ScratchManager::new(config.scratch.root.clone(), config.scratch.cleanup_delay);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            pool.clone(),
            scratch.clone(),
            config.upload.max_file_size,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                pool,
                scratch,
                dispatcher,
                requests: RequestCounter::default(),
                started_at: Utc::now(),
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn scratch(&self) -> &ScratchManager {
        &self.inner.scratch
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn requests(&self) -> &RequestCounter {
        &self.inner.requests
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Drain the worker pool, then flush scheduled cleanups
    ///
    /// Call after the HTTP server has stopped accepting requests.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        self.inner.pool.shutdown().await;
        self.inner.scratch.shutdown().await;
    }
}
