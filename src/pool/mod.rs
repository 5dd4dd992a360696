//! Fixed-size scheduler over a set of warm sandboxes.
//!
//! Jobs are queued in arrival order and handed to sandboxes in strict
//! round-robin rotation. The number of assigned jobs never exceeds the
//! number of sandboxes; everything else waits in the queue. `submit`
//! never blocks: it enqueues, kicks a drain pass and returns a handle.
//!
//! All queue and counter mutations happen under one lock, so concurrent
//! drain passes can never pop the same job twice or overrun capacity.

mod error;
mod stats;

pub use error::PoolError;
pub use stats::PoolStats;

use futures_util::future::join_all;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sandbox::{Sandbox, SandboxError};
use stats::Counters;

/// One queued execution request.
struct Job {
    id: Uuid,
    payload: Vec<u8>,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<String, SandboxError>>,
}

/// Scheduler state guarded by the pool lock.
#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    active: usize,
    cursor: usize,
    counters: Counters,
}

struct Inner {
    sandboxes: Vec<Arc<Sandbox>>,
    state: Mutex<PoolState>,
}

/// Pool of warm sandboxes with a FIFO job queue.
///
/// Cheap to clone; clones share the same sandboxes and queue.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Creates a pool over the given sandboxes.
    ///
    /// Fails with `PoolMisconfigured` if `sandboxes` is empty.
    pub fn new(sandboxes: Vec<Sandbox>) -> Result<Self, PoolError> {
        if sandboxes.is_empty() {
            return Err(PoolError::misconfigured("pool size must be at least 1"));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                sandboxes: sandboxes.into_iter().map(Arc::new).collect(),
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    /// Number of sandboxes in the pool.
    pub fn size(&self) -> usize {
        self.inner.sandboxes.len()
    }

    /// Queues a job and returns a handle resolving to its raw output.
    ///
    /// Never waits for capacity. Must be called from within a Tokio runtime.
    pub fn submit(&self, payload: impl Into<Vec<u8>>) -> JobHandle {
        let (reply, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        {
            let mut state = self.inner.lock();
            state.queue.push_back(Job {
                id,
                payload: payload.into(),
                enqueued_at: Instant::now(),
                reply,
            });
            debug!(job = %id, queued = state.queue.len(), "Job queued");
        }

        Inner::drain(&self.inner);
        JobHandle { id, rx }
    }

    /// Snapshot of current load and latency counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        state
            .counters
            .snapshot(self.size(), state.active, state.queue.len())
    }

    /// Brings every sandbox up concurrently.
    ///
    /// Failures are logged, not returned; the next job on that sandbox
    /// retries the readiness check. Returns how many sandboxes are ready.
    pub async fn warm(&self) -> usize {
        let results = join_all(self.inner.sandboxes.iter().map(|sandbox| async move {
            let result = sandbox.ensure_ready().await;
            if let Err(err) = &result {
                warn!(sandbox = sandbox.name(), "Failed to warm sandbox: {err}");
            }
            result
        }))
        .await;

        let ready = results.iter().filter(|result| result.is_ok()).count();
        info!(ready, pool_size = self.size(), "Sandbox pool warmed");
        ready
    }

    /// Tears every sandbox down. Errors are swallowed.
    pub async fn dispose(&self) {
        join_all(self.inner.sandboxes.iter().map(|sandbox| sandbox.dispose())).await;
        info!(pool_size = self.size(), "Sandbox pool disposed");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns queued jobs to sandboxes while there is free capacity.
    fn drain(inner: &Arc<Self>) {
        let pool_size = inner.sandboxes.len();
        let mut state = inner.lock();

        while state.active < pool_size {
            let Some(job) = state.queue.pop_front() else {
                break;
            };

            let index = state.cursor;
            state.cursor = (state.cursor + 1) % pool_size;
            state.active += 1;
            let waited = job.enqueued_at.elapsed();
            state.counters.total_queue_wait += waited;

            let sandbox = Arc::clone(&inner.sandboxes[index]);
            debug!(
                job = %job.id,
                sandbox = sandbox.name(),
                wait_ms = %waited.as_millis(),
                "Job assigned"
            );

            let owner = Arc::clone(inner);
            tokio::spawn(async move {
                Self::complete(owner, sandbox, job).await;
            });
        }
    }

    /// Runs an assigned job, records the outcome and re-drains.
    async fn complete(inner: Arc<Self>, sandbox: Arc<Sandbox>, job: Job) {
        let started = Instant::now();
        let result = sandbox.run(&job.payload).await;
        let elapsed = started.elapsed();

        if let Err(err) = &result {
            warn!(job = %job.id, sandbox = sandbox.name(), "Job failed: {err}");
        } else {
            debug!(job = %job.id, sandbox = sandbox.name(), run_ms = %elapsed.as_millis(), "Job finished");
        }

        {
            let mut state = inner.lock();
            state.active -= 1;
            state.counters.record_run(elapsed, result.is_err());
        }

        // The submitter may have stopped waiting; the result is dropped then.
        let _ = job.reply.send(result);

        Self::drain(&inner);
    }
}

/// Handle to a submitted job; resolves once the job has run.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<String, SandboxError>>,
}

impl JobHandle {
    /// Identifier used in log fields for this job.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for JobHandle {
    type Output = Result<String, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result.map_err(PoolError::from),
            Err(_) => Err(PoolError::Abandoned { id }),
        })
    }
}
