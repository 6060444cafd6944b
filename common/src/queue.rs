//! Task queue and worker pool
//!
//! An unbounded FIFO of pending work items paired with a drain barrier: the
//! run is complete iff the queue is empty and every taken item has been
//! marked done. Workers are long-lived; a failing task is logged and marked
//! done so it can never wedge the barrier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Aggregate counters shared between workers and the orchestrator
#[derive(Debug, Default)]
pub struct RunStats {
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub missing: AtomicU64,
    pub repaired: AtomicU64,
    pub verified: AtomicU64,
    pub mismatched: AtomicU64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tasks executed:      {:>10}", self.executed.load(Ordering::Relaxed))?;
        writeln!(f, "tasks failed:        {:>10}", self.failed.load(Ordering::Relaxed))?;
        writeln!(f, "files missing:       {:>10}", self.missing.load(Ordering::Relaxed))?;
        writeln!(f, "files repaired:      {:>10}", self.repaired.load(Ordering::Relaxed))?;
        writeln!(f, "checksums verified:  {:>10}", self.verified.load(Ordering::Relaxed))?;
        write!(f, "checksum mismatches: {:>10}", self.mismatched.load(Ordering::Relaxed))
    }
}

/// Unbounded task queue with an atomic in-flight counter
///
/// `in_flight` counts items that are queued or taken-but-not-done; the
/// drain barrier trips when it reaches zero. FIFO ordering is incidental,
/// correctness depends only on set membership and empty detection.
#[derive(Debug)]
pub struct TaskQueue<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
    in_flight: AtomicUsize,
    drained: tokio::sync::Notify,
    aborted: AtomicBool,
    first_error: std::sync::Mutex<Option<anyhow::Error>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            in_flight: AtomicUsize::new(0),
            drained: tokio::sync::Notify::new(),
            aborted: AtomicBool::new(false),
            first_error: std::sync::Mutex::new(None),
        }
    }

    /// Enqueue a task; never blocks
    pub fn put(&self, task: T) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.tx
            .try_send(task)
            .expect("queue channel must stay open while the queue is alive");
    }

    /// Dequeue the next task, suspending until one is available
    pub async fn take(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Mark a previously taken task as done; must be called exactly once
    /// per taken task, success or failure
    pub fn mark_done(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "mark_done without a matching put");
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Number of tasks enqueued or taken but not yet marked done
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Record the first task failure and stop handing out work
    pub fn abort(&self, error: anyhow::Error) {
        let mut first = self.first_error.lock().unwrap();
        if first.is_none() {
            *first = Some(error);
        }
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Block until the queue is empty and no task is in flight
    ///
    /// Returns the first recorded task failure when the run was aborted.
    pub async fn join(&self) -> anyhow::Result<()> {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        match self.first_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Start exactly `n` long-lived workers pulling from `queue`
///
/// Each worker loops take / execute / mark-done until the queue handle is
/// dropped at process exit. Task failures are counted and logged, never
/// propagated; with `abort_on_failure` the first failure is recorded on the
/// queue and the remaining tasks are drained without executing.
pub fn spawn_workers<T, F, Fut>(
    queue: &Arc<TaskQueue<T>>,
    stats: &Arc<RunStats>,
    n: usize,
    abort_on_failure: bool,
    exec: F,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    assert!(n > 0);
    for id in 0..n {
        let queue = queue.clone();
        let stats = stats.clone();
        let exec = exec.clone();
        tokio::spawn(async move {
            tracing::debug!("worker {} started", id);
            while let Some(task) = queue.take().await {
                if queue.is_aborted() {
                    queue.mark_done();
                    continue;
                }
                match exec(task).await {
                    Ok(()) => {
                        stats.executed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        stats.executed.fetch_add(1, Ordering::Relaxed);
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("task failed: {:#}", error);
                        if abort_on_failure {
                            queue.abort(error);
                        }
                    }
                }
                queue.mark_done();
            }
        });
    }
}
