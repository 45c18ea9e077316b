//! Shared sequential work queue.
//!
//! A single worker thread executes tasks one at a time. Every task carries a
//! due time on the queue's [`Clock`]: immediate tasks are due when submitted,
//! delayed tasks after their delay. Due tasks run in due-time order, ties
//! broken by submission order, so immediate submissions are strictly FIFO.
//!
//! The queue is shared by reference ([`WorkQueue`] is a cheap clone) between
//! the server and any collaborator whose work must serialize with registry
//! operations.
//!
//! ## Lifecycle
//!
//! ```text
//! accepting --shutdown()--> shut down --backlog empty--> terminated
//! ```
//!
//! After `shutdown()` new submissions are rejected, but everything already
//! queued (including delayed tasks) still runs. The worker exits once nothing
//! is left.

use crate::clock::{Clock, SystemClock};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use strata_core::{StrataError, StrataResult};
use tracing::{debug, error, info};

/// Worker thread name used when none is configured
pub const DEFAULT_WORKER_NAME: &str = "strata-queue";

type Work = Box<dyn FnOnce() + Send>;

/// Queue metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of tasks waiting, due or not.
    pub pending: usize,
    /// Whether a task is executing right now.
    pub active: bool,
    /// Total number of tasks completed since queue creation.
    pub tasks_completed: u64,
    /// Whether new submissions are rejected.
    pub shutdown: bool,
    /// Whether the worker has exited.
    pub terminated: bool,
}

struct TaskEnvelope {
    due: Duration,
    sequence: u64,
    work: Work,
}

impl Eq for TaskEnvelope {}

impl PartialEq for TaskEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

// BinaryHeap is a max-heap: earliest due first, then lowest sequence first
impl Ord for TaskEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TaskEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    tasks: BinaryHeap<TaskEnvelope>,
    next_sequence: u64,
    active: bool,
    tasks_completed: u64,
    shutdown: bool,
    terminated: bool,
}

impl QueueState {
    fn has_due_task(&self, now: Duration) -> bool {
        self.tasks.peek().is_some_and(|t| t.due <= now)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Signalled when a task is added or shutdown is requested
    work_ready: Condvar,
    /// Signalled when the worker finishes a task, parks, or exits
    idle_cond: Condvar,
    clock: Arc<dyn Clock>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: OnceLock<ThreadId>,
    name: String,
}

impl QueueInner {
    fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            info!(target: "strata::queue", queue = %self.name, pending = state.tasks.len(), "Work queue shutting down");
        }
        self.work_ready.notify_all();
    }
}

/// Shuts the queue down when the last [`WorkQueue`] clone is dropped.
///
/// The worker only holds [`QueueInner`], so it does not keep this alive.
struct QueueOwner {
    inner: Arc<QueueInner>,
}

impl Drop for QueueOwner {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// Handle to the shared single-worker task queue.
///
/// Cloning the handle does not create a new worker; all clones feed the same
/// thread. Dropping the last clone shuts the queue down: the backlog still
/// runs, then the worker exits. A queued task that owns a clone keeps the
/// queue open until it runs.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
    _owner: Arc<QueueOwner>,
}

impl WorkQueue {
    /// Start a queue driven by the system clock.
    pub fn new(name: impl Into<String>) -> StrataResult<Self> {
        Self::with_clock(name, Arc::new(SystemClock::new()))
    }

    /// Start a queue driven by `clock`.
    ///
    /// The worker thread is named `name`.
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> StrataResult<Self> {
        let name = name.into();
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            idle_cond: Condvar::new(),
            clock,
            worker: Mutex::new(None),
            worker_id: OnceLock::new(),
            name: name.clone(),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(&inner_clone))?;
        let _ = inner.worker_id.set(handle.thread().id());
        *inner.worker.lock() = Some(handle);

        let owner = Arc::new(QueueOwner {
            inner: Arc::clone(&inner),
        });
        Ok(Self {
            inner,
            _owner: owner,
        })
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submit a task and get a handle to its result.
    ///
    /// Returns `Err(QueueShutDown)` once the queue has been shut down.
    pub fn submit<T, F>(&self, work: F) -> StrataResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(TaskSlot::new());
        let completion = Completion {
            slot: Arc::clone(&slot),
        };
        self.enqueue(
            Duration::ZERO,
            Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work)).map_err(|e| {
                    let msg = panic_message(e.as_ref());
                    error!(target: "strata::queue", panic = %msg, "queued task panicked");
                    msg
                });
                completion.slot.complete(outcome);
            }),
        )?;
        Ok(TaskHandle { slot })
    }

    /// Submit a task without waiting for it.
    pub fn execute(&self, work: impl FnOnce() + Send + 'static) -> StrataResult<()> {
        self.enqueue(Duration::ZERO, Box::new(work)).map(|_| ())
    }

    /// Submit a task that becomes due after `delay`.
    ///
    /// The returned handle can cancel the task while it is still waiting.
    pub fn schedule(
        &self,
        delay: Duration,
        work: impl FnOnce() + Send + 'static,
    ) -> StrataResult<ScheduledTask> {
        let sequence = self.enqueue(delay, Box::new(work))?;
        Ok(ScheduledTask {
            inner: Arc::clone(&self.inner),
            sequence,
        })
    }

    fn enqueue(&self, delay: Duration, work: Work) -> StrataResult<u64> {
        let due = self.inner.clock.now().saturating_add(delay);
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return Err(StrataError::QueueShutDown);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.tasks.push(TaskEnvelope {
            due,
            sequence,
            work,
        });
        self.inner.work_ready.notify_one();
        Ok(sequence)
    }

    /// Stop accepting tasks.
    ///
    /// Already-queued tasks still run; the worker exits when none remain.
    /// Safe to call from a task running on this queue. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// True when called from a task running on this queue's worker.
    pub fn is_worker_thread(&self) -> bool {
        self.inner.worker_id.get() == Some(&std::thread::current().id())
    }

    /// True once new submissions are rejected.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// True once the worker has exited.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Block until the worker exits or `timeout` of real time passes.
    ///
    /// Returns whether the queue terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.inner.state.lock();
            while !state.terminated {
                if self
                    .inner
                    .idle_cond
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    return state.terminated;
                }
            }
        }
        self.join_worker();
        true
    }

    fn join_worker(&self) {
        // The worker cannot join itself
        if self.is_worker_thread() {
            return;
        }
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Block until no task is due and none is running.
    ///
    /// Delayed tasks whose time has not come are not waited for.
    pub fn drain(&self) {
        let mut state = self.inner.state.lock();
        while state.active || state.has_due_task(self.inner.clock.now()) {
            if state.terminated {
                break;
            }
            self.inner.idle_cond.wait(&mut state);
        }
    }

    /// Return a snapshot of queue metrics.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            pending: state.tasks.len(),
            active: state.active,
            tasks_completed: state.tasks_completed,
            shutdown: state.shutdown,
            terminated: state.terminated,
        }
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Task Handles
// ============================================================================

struct TaskSlot<T> {
    result: Mutex<Option<Result<T, String>>>,
    done: Condvar,
}

impl<T> TaskSlot<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// First completion wins
    fn complete(&self, outcome: Result<T, String>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
        }
        self.done.notify_all();
    }
}

/// Completes the slot with an error if the task is dropped unrun.
struct Completion<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.slot
            .complete(Err("task dropped before it ran".to_string()));
    }
}

/// Result of a task submitted with [`WorkQueue::submit`].
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run.
    ///
    /// No timeout: a task that never returns blocks the caller forever.
    pub fn wait(self) -> StrataResult<T> {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(outcome) = result.take() {
                return outcome.map_err(StrataError::TaskPanicked);
            }
            self.slot.done.wait(&mut result);
        }
    }

    /// True once the task has produced its result.
    pub fn is_finished(&self) -> bool {
        self.slot.result.lock().is_some()
    }
}

/// A delayed task returned by [`WorkQueue::schedule`].
pub struct ScheduledTask {
    inner: Arc<QueueInner>,
    sequence: u64,
}

impl ScheduledTask {
    /// Remove the task if it has not started.
    ///
    /// Returns true if the task was removed and will never run.
    pub fn cancel(self) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.sequence != self.sequence);
        let removed = state.tasks.len() != before;
        if removed {
            debug!(target: "strata::queue", sequence = self.sequence, "Cancelled scheduled task");
            // Lets a shut-down worker notice it has nothing left.
            self.inner.work_ready.notify_all();
        }
        removed
    }
}

// ============================================================================
// Worker
// ============================================================================

/// RAII guard that clears `active` and notifies drain waiters on drop.
///
/// Keeps the bookkeeping right even if a task unwinds past `catch_unwind`.
struct ActiveTaskGuard<'a> {
    inner: &'a QueueInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.active = false;
        state.tasks_completed += 1;
        self.inner.idle_cond.notify_all();
    }
}

fn next_task(inner: &QueueInner) -> Option<TaskEnvelope> {
    let mut state = inner.state.lock();
    loop {
        let now = inner.clock.now();
        match state.tasks.peek().map(|t| t.due) {
            Some(due) if due <= now => {
                if let Some(task) = state.tasks.pop() {
                    state.active = true;
                    return Some(task);
                }
            }
            Some(due) => {
                inner.idle_cond.notify_all();
                let remaining = due - now;
                let park = inner
                    .clock
                    .park_limit()
                    .map_or(remaining, |limit| limit.min(remaining));
                inner.work_ready.wait_for(&mut state, park);
            }
            None if state.shutdown => {
                state.terminated = true;
                inner.idle_cond.notify_all();
                return None;
            }
            None => {
                inner.idle_cond.notify_all();
                inner.work_ready.wait(&mut state);
            }
        }
    }
}

fn worker_loop(inner: &QueueInner) {
    while let Some(task) = next_task(inner) {
        let _guard = ActiveTaskGuard { inner };

        // catch_unwind keeps a panicking task from killing the worker thread
        if let Err(e) = panic::catch_unwind(AssertUnwindSafe(task.work)) {
            error!(
                target: "strata::queue",
                panic = %panic_message(e.as_ref()),
                "background task panicked"
            );
        }
    }
    info!(target: "strata::queue", queue = %inner.name, "Work queue terminated");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
