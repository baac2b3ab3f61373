//! Pool worker loop
//!
//! Each worker is a dedicated OS thread. It binds to a device once, then
//! pulls jobs from the shared FIFO queue and runs them one at a time with a
//! private converter cache.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::device::DeviceRegistry;
use super::types::{JobOutcome, PoolCounters, PoolError, RequestJob, WorkerIdentity};
use crate::converter::ConverterCache;
use crate::engine::ConverterFactory;

/// A queued job and the channel its result goes back on
pub(super) struct Envelope {
    pub job: RequestJob,
    pub reply: oneshot::Sender<Result<JobOutcome, PoolError>>,
}

pub(super) type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>;

/// Everything a worker needs, passed at spawn time
pub(super) struct WorkerContext {
    pub registry: Arc<DeviceRegistry>,
    pub factory: Arc<dyn ConverterFactory>,
    pub receiver: SharedReceiver,
    pub counters: Arc<PoolCounters>,
    pub cache_capacity: usize,
}

/// Spawn a worker thread.
///
/// The worker reports its identity (or its binding failure) on `ready`
/// before it starts pulling jobs.
pub(super) fn spawn(
    index: usize,
    ctx: WorkerContext,
    ready: std_mpsc::Sender<Result<WorkerIdentity, PoolError>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("parse-worker-{}", index))
        .spawn(move || {
            let (ordinal, device) = match ctx.registry.assign_next() {
                Ok(assigned) => assigned,
                Err(e) => {
                    tracing::error!(worker = index, "Device binding failed: {}", e);
                    let _ = ready.send(Err(e));
                    return;
                }
            };

            let identity = WorkerIdentity {
                ordinal,
                device,
                process_id: std::process::id(),
                thread: thread::current().name().unwrap_or("parse-worker").to_string(),
            };
            tracing::info!(worker = ordinal, device = %device, "Worker bound to device");

            if ready.send(Ok(identity.clone())).is_err() {
                return;
            }
            drop(ready);

            run(identity, ctx);
        })
}

fn run(identity: WorkerIdentity, ctx: WorkerContext) {
    let mut cache: ConverterCache = ConverterCache::new(ctx.cache_capacity);

    loop {
        // Holding the lock while blocked keeps hand-off in FIFO order
        let envelope = { ctx.receiver.lock().blocking_recv() };
        let Some(Envelope { job, reply }) = envelope else {
            break;
        };

        PoolCounters::incr(&ctx.counters.busy);
        let started = Instant::now();
        let request_id = job.request_id.clone();

        let result = catch_unwind(AssertUnwindSafe(|| execute(&identity, &ctx, &cache, &job)));
        PoolCounters::decr(&ctx.counters.busy);

        let result = match result {
            Ok(Ok((output, cache_hit))) => {
                PoolCounters::incr(&ctx.counters.completed);
                if cache_hit {
                    PoolCounters::incr(&ctx.counters.cache_hits);
                }
                Ok(JobOutcome {
                    output,
                    worker: identity.clone(),
                    cache_hit,
                    elapsed: started.elapsed(),
                })
            }
            Ok(Err(e)) => {
                PoolCounters::incr(&ctx.counters.failed);
                tracing::warn!(request_id = %request_id, worker = identity.ordinal, "Job failed: {}", e);
                Err(PoolError::Engine(e))
            }
            Err(panic) => {
                PoolCounters::incr(&ctx.counters.crashed);
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    request_id = %request_id,
                    worker = identity.ordinal,
                    device = %identity.device,
                    "Worker crashed mid-job, restarting with a fresh converter cache: {}",
                    message
                );
                cache = ConverterCache::new(ctx.cache_capacity);
                Err(PoolError::WorkerCrashed {
                    ordinal: identity.ordinal,
                    message,
                })
            }
        };

        if reply.send(result).is_err() {
            tracing::debug!(request_id = %request_id, "Submitter went away before the result arrived");
        }
    }

    tracing::info!(worker = identity.ordinal, "Worker stopped");
}

fn execute(
    identity: &WorkerIdentity,
    ctx: &WorkerContext,
    cache: &ConverterCache,
    job: &RequestJob,
) -> Result<(crate::engine::EngineOutput, bool), crate::engine::EngineError> {
    let (converter, cache_hit) = cache.get_or_build(&job.key, || {
        tracing::info!(
            request_id = %job.request_id,
            worker = identity.ordinal,
            device = %identity.device,
            key = %job.key.digest(),
            "Constructing converter"
        );
        let built = ctx.factory.build(&job.config, &identity.device);
        if built.is_ok() {
            ctx.counters.converters_built.fetch_add(1, Ordering::Relaxed);
        }
        built
    })?;

    tracing::debug!(
        request_id = %job.request_id,
        worker = identity.ordinal,
        key = %job.key.digest(),
        cache_hit,
        converter = %converter.kind(),
        "Processing document"
    );

    let output = converter.convert(&job.source, &job.output_dir)?;
    Ok((output, cache_hit))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
