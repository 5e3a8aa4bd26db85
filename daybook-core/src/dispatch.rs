/*!
Offload dispatcher for codec work.

Small payloads are transformed inline on the calling task. Payloads whose
serialized size crosses the offload threshold are shipped to a single
lazily-spawned background worker thread over a request channel; replies are
matched back to callers through a correlation-id map of oneshot senders. A
job that gets no reply within the timeout window is evicted and fails, while
the worker itself stays up; a worker panic fails every in-flight job at once
and the next dispatch spawns a fresh worker. If the worker cannot be spawned
at all the dispatcher silently degrades to inline execution.
*/

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{DaybookError, Result};

/// Payloads serialized above this size are offloaded to the worker.
pub const OFFLOAD_THRESHOLD_BYTES: usize = 1024 * 1024;

/// How long a dispatched job may wait for its correlated reply.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// The two codec transforms a job can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOp {
    Compress,
    Decompress,
    /// Sleeps before replying; exists to exercise timeout handling.
    #[cfg(test)]
    Stall(Duration),
}

/// Tuning knobs for the dispatcher; defaults match the production policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub offload_threshold: usize,
    pub job_timeout: Duration,
    pub worker_enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            offload_threshold: OFFLOAD_THRESHOLD_BYTES,
            job_timeout: JOB_TIMEOUT,
            worker_enabled: true,
        }
    }
}

struct WorkerRequest {
    correlation_id: u64,
    operation: CodecOp,
    payload: Value,
}

enum JobOutcome {
    Done(Value),
    Failed(String),
    Fault(String),
}

type PendingMap = HashMap<u64, oneshot::Sender<JobOutcome>>;
type Pending = Arc<Mutex<PendingMap>>;

struct WorkerHandle {
    sender: mpsc::Sender<WorkerRequest>,
    pending: Pending,
    alive: Arc<AtomicBool>,
}

/// Routes codec work inline or to the background worker.
pub struct OffloadDispatcher {
    config: DispatchConfig,
    worker: Mutex<Option<Arc<WorkerHandle>>>,
    next_id: AtomicU64,
}

static GLOBAL_DISPATCHER: Lazy<Arc<OffloadDispatcher>> =
    Lazy::new(|| Arc::new(OffloadDispatcher::new(DispatchConfig::default())));

enum Dispatched {
    Completed(Value),
    /// Worker capability absent; carries the payload back for inline use.
    Unavailable(Value),
}

impl OffloadDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        OffloadDispatcher {
            config,
            worker: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Process-wide dispatcher with the default policy.
    pub fn global() -> Arc<OffloadDispatcher> {
        Arc::clone(&GLOBAL_DISPATCHER)
    }

    /// Apply a codec transform to a parsed JSON payload, offloading to the
    /// background worker when the payload is large enough.
    ///
    /// Worker absence is invisible to the caller; worker faults, per-job
    /// errors, and timeouts surface as errors.
    pub async fn transform(&self, operation: CodecOp, payload: Value) -> Result<Value> {
        let size = payload.to_string().len();
        if size <= self.config.offload_threshold {
            return perform(operation, payload);
        }
        if !self.config.worker_enabled {
            debug!(size, "offload disabled, transforming inline");
            return perform(operation, payload);
        }

        debug!(
            size,
            threshold = self.config.offload_threshold,
            "payload above threshold, offloading"
        );
        match self.dispatch_to_worker(operation, payload).await? {
            Dispatched::Completed(result) => Ok(result),
            Dispatched::Unavailable(payload) => {
                debug!("background path unavailable, transforming inline");
                perform(operation, payload)
            }
        }
    }

    /// Terminate the background worker and clear all pending correlations.
    /// The next dispatched job spawns a fresh worker.
    pub fn shutdown(&self) {
        let handle = self.lock_slot().take();
        if let Some(handle) = handle {
            info!("shutting down background worker");
            handle.alive.store(false, Ordering::SeqCst);
            fail_all(&handle.pending, "dispatcher shut down");
        }
    }

    async fn dispatch_to_worker(&self, operation: CodecOp, payload: Value) -> Result<Dispatched> {
        let handle = match self.ensure_worker() {
            Some(handle) => handle,
            None => return Ok(Dispatched::Unavailable(payload)),
        };

        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock_map(&handle.pending).insert(correlation_id, reply_tx);

        let request = WorkerRequest {
            correlation_id,
            operation,
            payload,
        };
        if handle.sender.send(request).is_err() {
            // Channel closed under us: the worker is gone mid-dispatch.
            lock_map(&handle.pending).remove(&correlation_id);
            fail_all(&handle.pending, "background worker terminated unexpectedly");
            self.clear_worker(&handle);
            return Err(DaybookError::worker_fault(
                "background worker terminated unexpectedly",
            ));
        }
        debug!(correlation_id, ?operation, "job dispatched to background worker");

        match timeout(self.config.job_timeout, reply_rx).await {
            Err(_elapsed) => {
                lock_map(&handle.pending).remove(&correlation_id);
                warn!(
                    correlation_id,
                    timeout = ?self.config.job_timeout,
                    "background job timed out"
                );
                Err(DaybookError::WorkerTimeout(self.config.job_timeout))
            }
            Ok(Err(_dropped)) => Err(DaybookError::worker_fault(
                "background worker dropped the job",
            )),
            Ok(Ok(JobOutcome::Done(result))) => Ok(Dispatched::Completed(result)),
            Ok(Ok(JobOutcome::Failed(message))) => Err(DaybookError::Worker(message)),
            Ok(Ok(JobOutcome::Fault(message))) => {
                self.clear_worker(&handle);
                Err(DaybookError::WorkerFault(message))
            }
        }
    }

    /// Return the live worker, spawning one if needed. `None` means the
    /// capability is absent and the caller should run inline.
    fn ensure_worker(&self) -> Option<Arc<WorkerHandle>> {
        let mut slot = self.lock_slot();
        if let Some(handle) = slot.as_ref() {
            if handle.alive.load(Ordering::SeqCst) {
                return Some(Arc::clone(handle));
            }
            fail_all(&handle.pending, "background worker terminated unexpectedly");
            *slot = None;
        }
        match spawn_worker() {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *slot = Some(Arc::clone(&handle));
                Some(handle)
            }
            Err(err) => {
                warn!(error = %err, "background worker could not be spawned");
                None
            }
        }
    }

    /// Drop the slot only if it still holds the given stale worker, so a
    /// replacement spawned meanwhile is left alone.
    fn clear_worker(&self, stale: &Arc<WorkerHandle>) {
        let mut slot = self.lock_slot();
        if let Some(current) = slot.as_ref() {
            if Arc::ptr_eq(current, stale) {
                *slot = None;
            }
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Arc<WorkerHandle>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for OffloadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_map(pending: &Pending) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_worker() -> std::io::Result<WorkerHandle> {
    let (sender, receiver) = mpsc::channel::<WorkerRequest>();
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let alive = Arc::new(AtomicBool::new(true));

    let worker_pending = Arc::clone(&pending);
    let worker_alive = Arc::clone(&alive);
    thread::Builder::new()
        .name("daybook-codec-worker".into())
        .spawn(move || worker_loop(receiver, worker_pending, worker_alive))?;

    Ok(WorkerHandle {
        sender,
        pending,
        alive,
    })
}

fn worker_loop(receiver: mpsc::Receiver<WorkerRequest>, pending: Pending, alive: Arc<AtomicBool>) {
    while let Ok(request) = receiver.recv() {
        let correlation_id = request.correlation_id;
        let job = AssertUnwindSafe(|| perform(request.operation, request.payload));
        let outcome = match panic::catch_unwind(job) {
            Ok(Ok(result)) => JobOutcome::Done(result),
            Ok(Err(err)) => JobOutcome::Failed(err.to_string()),
            Err(_panic) => {
                alive.store(false, Ordering::SeqCst);
                error!(correlation_id, "background worker panicked");
                fail_all(&pending, "background worker panicked");
                return;
            }
        };
        match lock_map(&pending).remove(&correlation_id) {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => debug!(correlation_id, "discarding stale reply for evicted job"),
        }
    }
    // All request senders dropped: dispatcher shut down or was dropped.
    alive.store(false, Ordering::SeqCst);
    fail_all(&pending, "background worker terminated");
}

fn fail_all(pending: &Pending, reason: &str) {
    let mut map = lock_map(pending);
    if map.is_empty() {
        return;
    }
    warn!(count = map.len(), reason, "rejecting all pending background jobs");
    for (_, reply) in map.drain() {
        let _ = reply.send(JobOutcome::Fault(reason.to_string()));
    }
}

fn perform(operation: CodecOp, payload: Value) -> Result<Value> {
    match operation {
        CodecOp::Compress => codec::compact_value(payload),
        CodecOp::Decompress => codec::expand_value(payload),
        #[cfg(test)]
        CodecOp::Stall(delay) => {
            thread::sleep(delay);
            Ok(payload)
        }
    }
}
