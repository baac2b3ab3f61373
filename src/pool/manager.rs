//! Worker Pool Manager
//!
//! # Design
//!
//! ```text
//! submit(job) ──► [ FIFO queue ] ──► worker 0 (cuda:0) ─┐
//!    ▲                          ├──► worker 1 (cuda:0) ─┼─► oneshot reply
//!    │                          └──► worker N (cuda:k) ─┘
//!    └──────────── await ◄──────────────────────────────┘
//! ```
//!
//! Submitting never blocks: jobs beyond the worker count wait in the queue.
//! Shutdown closes the queue, lets workers drain what is already queued and
//! joins every thread.

use std::sync::atomic::Ordering;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::device::DeviceRegistry;
use super::types::{JobOutcome, PoolCounters, PoolError, PoolStats, RequestJob, WorkerIdentity};
use super::worker::{self, Envelope, WorkerContext};
use crate::config::PoolConfig;
use crate::engine::ConverterFactory;

/// Fixed-size pool of device-bound workers
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: Vec<WorkerIdentity>,
    registry: Arc<DeviceRegistry>,
    counters: Arc<PoolCounters>,
    engine: &'static str,
}

impl WorkerPool {
    /// Spawn every worker and wait until each has bound its device.
    ///
    /// Fails if any worker cannot bind; already started workers are stopped.
    pub fn start(config: &PoolConfig, factory: Arc<dyn ConverterFactory>) -> Result<Self, PoolError> {
        let registry = Arc::new(DeviceRegistry::new(
            config.device_count,
            config.processes_per_device,
        ));
        let worker_count = config.worker_count.unwrap_or_else(|| registry.capacity());
        if worker_count == 0 {
            return Err(PoolError::WorkerInit("worker count must be at least 1".into()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(PoolCounters::default());
        let engine = factory.name();

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let ctx = WorkerContext {
                registry: Arc::clone(&registry),
                factory: Arc::clone(&factory),
                receiver: Arc::clone(&receiver),
                counters: Arc::clone(&counters),
                cache_capacity: config.converter_cache_capacity,
            };
            match worker::spawn(index, ctx, ready_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    drop(sender);
                    join_all(handles);
                    return Err(PoolError::WorkerInit(format!("failed to spawn worker thread: {}", e)));
                }
            }
        }
        drop(ready_tx);

        let mut workers = Vec::with_capacity(worker_count);
        let mut failure = None;
        for _ in 0..worker_count {
            match ready_rx.recv() {
                Ok(Ok(identity)) => workers.push(identity),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(PoolError::WorkerInit("worker exited during startup".into()));
                }
            }
        }

        if let Some(e) = failure {
            drop(sender);
            join_all(handles);
            return Err(e);
        }

        workers.sort_by_key(|w| w.ordinal);
        tracing::info!(
            workers = worker_count,
            devices = config.device_count,
            processes_per_device = registry.processes_per_device(),
            engine,
            "Worker pool started"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                sender: Mutex::new(Some(sender)),
                handles: Mutex::new(handles),
                workers,
                registry,
                counters,
                engine,
            }),
        })
    }

    /// Queue a job and wait for its result
    pub async fn submit(&self, job: RequestJob) -> Result<JobOutcome, PoolError> {
        let (reply, result) = oneshot::channel();
        {
            let sender = self.inner.sender.lock();
            let sender = sender.as_ref().ok_or(PoolError::ShuttingDown)?;
            sender
                .send(Envelope { job, reply })
                .map_err(|_| PoolError::ShuttingDown)?;
        }
        PoolCounters::incr(&self.inner.counters.submitted);

        result.await.map_err(|_| PoolError::WorkerLost)?
    }

    /// Stop accepting jobs, drain the queue and join all workers
    pub async fn shutdown(&self) {
        let sender = self.inner.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<_> = std::mem::take(&mut *self.inner.handles.lock());
        let count = handles.len();
        tracing::info!(workers = count, "Draining worker pool...");

        if let Err(e) = tokio::task::spawn_blocking(move || join_all(handles)).await {
            tracing::error!("Failed to join worker threads: {}", e);
        }
        tracing::info!("Worker pool stopped");
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.sender.lock().is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// Identities of all workers, ordered by ordinal
    pub fn workers(&self) -> &[WorkerIdentity] {
        &self.inner.workers
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        let submitted = c.submitted.load(Ordering::Relaxed);
        let completed = c.completed.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let crashed = c.crashed.load(Ordering::Relaxed);
        let busy = c.busy.load(Ordering::Relaxed);

        PoolStats {
            engine: self.inner.engine,
            workers: self.inner.workers.len(),
            device_count: self.inner.registry.device_count(),
            processes_per_device: self.inner.registry.processes_per_device(),
            accepting: self.is_accepting(),
            submitted,
            completed,
            failed,
            crashed,
            busy,
            queued: submitted.saturating_sub(completed + failed + crashed + busy),
            converters_built: c.converters_built.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
        }
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("Worker thread panicked outside a job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterConfig;
    use crate::engine::{Converter, ConverterKind, EngineError, EngineOutput};
    use crate::pool::Device;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Engine stub: `mode` selects sleep, failure or panic
    struct StubFactory {
        builds: AtomicUsize,
    }

    struct StubConverter {
        mode: String,
    }

    impl ConverterFactory for StubFactory {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn build(&self, config: &ConverterConfig, _device: &Device) -> Result<Arc<dyn Converter>, EngineError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let mode = config.get_str("mode").unwrap_or("ok").to_string();
            if mode == "bad-build" {
                return Err(EngineError::construction("bad service"));
            }
            Ok(Arc::new(StubConverter { mode }))
        }
    }

    impl Converter for StubConverter {
        fn kind(&self) -> ConverterKind {
            ConverterKind::Standard
        }

        fn convert(&self, _source: &Path, _output_dir: &Path) -> Result<EngineOutput, EngineError> {
            match self.mode.as_str() {
                "panic" => panic!("engine blew up"),
                "fail" => Err(EngineError::execution("corrupt file")),
                "slow" => {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(EngineOutput { pages: 1, ..Default::default() })
                }
                _ => Ok(EngineOutput { pages: 1, ..Default::default() }),
            }
        }
    }

    fn start(workers: usize) -> (WorkerPool, Arc<StubFactory>) {
        let factory = Arc::new(StubFactory { builds: AtomicUsize::new(0) });
        let config = PoolConfig {
            device_count: 0,
            processes_per_device: 1,
            worker_count: Some(workers),
            converter_cache_capacity: 0,
        };
        let pool = WorkerPool::start(&config, factory.clone()).unwrap();
        (pool, factory)
    }

    fn job(mode: &str) -> RequestJob {
        RequestJob::new(
            "req",
            "/tmp/none.pdf",
            "/tmp/none",
            ConverterConfig::new().with("mode", mode),
        )
    }

    #[tokio::test]
    async fn test_same_key_builds_once_per_worker() {
        let (pool, factory) = start(1);
        for _ in 0..5 {
            pool.submit(job("ok")).await.unwrap();
        }
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().cache_hits, 4);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_extra_job_queues_instead_of_failing() {
        let (pool, _) = start(2);
        let jobs: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(job("slow")).await })
            })
            .collect();

        let mut ok = 0;
        for handle in jobs {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(pool.stats().completed, 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_is_reported_and_worker_recovers() {
        let (pool, _) = start(1);

        let err = pool.submit(job("panic")).await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerCrashed { ordinal: 0, .. }));
        assert!(err.to_string().contains("engine blew up"));

        let outcome = pool.submit(job("ok")).await.unwrap();
        assert_eq!(outcome.worker.ordinal, 0);
        assert_eq!(pool.stats().crashed, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_failure_does_not_poison_other_keys() {
        let (pool, factory) = start(1);

        let err = pool.submit(job("bad-build")).await.unwrap_err();
        assert!(matches!(err, PoolError::Engine(EngineError::Construction { .. })));
        assert!(pool.submit(job("ok")).await.is_ok());
        assert!(matches!(
            pool.submit(job("fail")).await,
            Err(PoolError::Engine(EngineError::Execution { .. }))
        ));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let (pool, _) = start(1);
        let queued = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(job("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.shutdown().await;
        assert!(queued.await.unwrap().is_ok());
        assert!(matches!(pool.submit(job("ok")).await, Err(PoolError::ShuttingDown)));
        assert!(!pool.stats().accepting);
    }

    #[test]
    fn test_oversubscribed_start_fails() {
        let factory = Arc::new(StubFactory { builds: AtomicUsize::new(0) });
        let config = PoolConfig {
            device_count: 1,
            processes_per_device: 1,
            worker_count: Some(2),
            converter_cache_capacity: 0,
        };
        let err = WorkerPool::start(&config, factory).err().unwrap();
        assert!(matches!(err, PoolError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_worker_count_from_devices() {
        let factory = Arc::new(StubFactory { builds: AtomicUsize::new(0) });
        let config = PoolConfig {
            device_count: 2,
            processes_per_device: 2,
            worker_count: None,
            converter_cache_capacity: 0,
        };
        let pool = WorkerPool::start(&config, factory).unwrap();
        let devices: Vec<_> = pool.workers().iter().map(|w| w.device).collect();
        assert_eq!(
            devices,
            vec![
                Device::Accelerator(0),
                Device::Accelerator(0),
                Device::Accelerator(1),
                Device::Accelerator(1)
            ]
        );
        drop(pool.inner.sender.lock().take());
    }
}
