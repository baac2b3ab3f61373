//! Worker pool types

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::device::Device;
use crate::converter::{ConfigurationKey, ConverterConfig};
use crate::engine::{EngineError, EngineOutput};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Worker {ordinal} crashed while processing the job: {message}")]
    WorkerCrashed { ordinal: usize, message: String },

    #[error("Worker exited before returning a result")]
    WorkerLost,

    #[error("Worker initialization failed: {0}")]
    WorkerInit(String),

    #[error("Worker {ordinal} maps to device {device} but only {available} device(s) are available")]
    DeviceUnavailable {
        ordinal: usize,
        device: usize,
        available: usize,
    },
}

// ============================================================================
// Jobs
// ============================================================================

/// One document to process
#[derive(Debug, Clone)]
pub struct RequestJob {
    pub request_id: String,
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub config: ConverterConfig,
    pub key: ConfigurationKey,
}

impl RequestJob {
    pub fn new(
        request_id: impl Into<String>,
        source: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: ConverterConfig,
    ) -> Self {
        let key = config.key();
        Self {
            request_id: request_id.into(),
            source: source.into(),
            output_dir: output_dir.into(),
            config,
            key,
        }
    }
}

/// Result of a completed job
#[derive(Debug)]
pub struct JobOutcome {
    pub output: EngineOutput,
    pub worker: WorkerIdentity,
    /// Converter was reused rather than constructed
    pub cache_hit: bool,
    pub elapsed: Duration,
}

/// Immutable identity of a pool worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdentity {
    pub ordinal: usize,
    pub device: Device,
    pub process_id: u32,
    pub thread: String,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub(super) struct PoolCounters {
    pub submitted: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
    pub crashed: AtomicUsize,
    pub busy: AtomicUsize,
    pub converters_built: AtomicUsize,
    pub cache_hits: AtomicUsize,
}

impl PoolCounters {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub engine: &'static str,
    pub workers: usize,
    pub device_count: usize,
    pub processes_per_device: usize,
    pub accepting: bool,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub crashed: usize,
    /// Jobs currently executing
    pub busy: usize,
    /// Jobs waiting for a free worker
    pub queued: usize,
    pub converters_built: usize,
    pub cache_hits: usize,
}

impl PoolStats {
    /// Fraction of workers currently executing a job
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.busy as f64 / self.workers as f64
    }
}
