//! Task queue core: admission, key fairness, drain signaling
//!
//! All queue state lives behind one mutex and every operation runs its
//! admission scan to exhaustion before releasing it, so completions and
//! enqueues are processed strictly one at a time. No lock is ever held across
//! an await point; the only real suspension happens inside executors, which
//! run elsewhere and deliver completions back through
//! [`mark_complete`](TaskQueue::mark_complete).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use eyre::Report;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::SchedulerError;
use crate::keys::KeyRotation;
use crate::progress::{CountingTracker, ProgressCounts, ProgressTracker};

/// Capability for beginning an admitted task.
///
/// Called from inside the admission scan while the queue lock is held: the
/// implementation must return promptly (fire-and-forget, e.g. `tokio::spawn`)
/// and must not call back into the queue from this frame. The task's eventual
/// completion arrives later through [`TaskQueue::mark_complete`].
pub trait TaskStarter<T>: Send + Sync {
    fn start(&self, key: &str, task: T);
}

impl<T, F> TaskStarter<T> for F
where
    F: Fn(&str, T) + Send + Sync,
{
    fn start(&self, key: &str, task: T) {
        self(key, task)
    }
}

/// Outcome of a single dequeue attempt
enum Dequeue<T> {
    /// A task cleared both caps and may start
    Admit { key: String, task: T },
    /// The overall cap is reached
    AtCapacity,
    /// No key has both spare capacity and pending work
    Exhausted,
}

/// State protected by the queue mutex
struct QueueInner<T> {
    /// Pending tasks per key; empty buckets are removed, not retained
    pending: HashMap<String, Vec<T>>,

    /// Started-but-not-completed count per key; entries at zero are removed
    running: HashMap<String, usize>,

    /// Keys that are candidates to receive the next started task
    available: KeyRotation,

    /// Authoritative lifecycle counts
    tracker: Box<dyn ProgressTracker<T>>,

    /// Set by the first `run`; tasks added earlier accumulate without starting
    started: bool,

    /// First task failure observed since the last drain delivery
    first_error: Option<Report>,

    /// Single-shot drain sink; taking it is what makes drain exactly-once
    drain_tx: Option<oneshot::Sender<Result<(), Report>>>,
}

/// A queue of opaque tasks run under a per-key and an overall concurrency cap.
///
/// Tasks are grouped by the key function. Within a key, the most recently
/// enqueued task is admitted first once capacity frees (LIFO under backlog);
/// across keys, candidates rotate in insertion order, with a saturated key
/// re-entering at the back of the rotation when one of its tasks completes.
///
/// Task failures never halt admission; the first error observed is carried to
/// the drain notification once every enqueued task has completed.
pub struct TaskQueue<T> {
    key_of: Box<dyn Fn(&T) -> String + Send + Sync>,
    starter: Box<dyn TaskStarter<T>>,
    config: QueueConfig,
    inner: Mutex<QueueInner<T>>,
    error_notify: Notify,
}

impl<T> TaskQueue<T> {
    /// Create a queue with the default [`CountingTracker`]
    pub fn new<F, S>(key_of: F, starter: S, config: QueueConfig) -> Result<Self, SchedulerError>
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
        S: TaskStarter<T> + 'static,
    {
        Self::with_tracker(key_of, starter, config, Box::new(CountingTracker::new()))
    }

    /// Create a queue with a caller-supplied tracker
    pub fn with_tracker<F, S>(
        key_of: F,
        starter: S,
        config: QueueConfig,
        tracker: Box<dyn ProgressTracker<T>>,
    ) -> Result<Self, SchedulerError>
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
        S: TaskStarter<T> + 'static,
    {
        config.validate()?;
        Ok(Self::from_validated(
            Box::new(key_of),
            Box::new(starter),
            config,
            tracker,
        ))
    }

    pub(crate) fn from_validated(
        key_of: Box<dyn Fn(&T) -> String + Send + Sync>,
        starter: Box<dyn TaskStarter<T>>,
        config: QueueConfig,
        tracker: Box<dyn ProgressTracker<T>>,
    ) -> Self {
        Self {
            key_of,
            starter,
            config,
            inner: Mutex::new(QueueInner {
                pending: HashMap::new(),
                running: HashMap::new(),
                available: KeyRotation::new(),
                tracker,
                started: false,
                first_error: None,
                drain_tx: None,
            }),
            error_notify: Notify::new(),
        }
    }

    /// Enqueue a task. Accepted at any time, before or after [`run`](Self::run);
    /// once the queue is started, newly admissible tasks begin immediately.
    pub fn add(&self, task: T) {
        let key = (self.key_of)(&task);
        let mut inner = self.lock();
        debug!(%key, "TaskQueue::add: called");

        inner.tracker.on_enqueue(&task);
        if !inner.available.contains(&key) && self.key_has_capacity(&inner, &key) {
            inner.available.push_back(&key);
        }
        inner.pending.entry(key).or_default().push(task);

        if inner.started {
            self.scan(&mut inner);
        }
    }

    /// Enqueue tasks in order; equivalent to repeated [`add`](Self::add)
    pub fn add_all<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = T>,
    {
        for task in tasks {
            self.add(task);
        }
    }

    /// Start the queue: admit everything currently admissible, then check for
    /// drain (which covers the empty-queue case). Later calls just re-scan
    /// and re-check drain.
    pub fn run(&self) {
        let mut inner = self.lock();
        debug!("TaskQueue::run: called");
        inner.started = true;
        self.scan(&mut inner);
        self.check_drain(&mut inner);
    }

    /// Report a started task as finished, successfully or with an error.
    ///
    /// Frees the task's key slot, records the first error for the drain
    /// result, admits newly eligible work and evaluates drain. Completing a
    /// task whose key has nothing running is a host programming error and is
    /// rejected with [`SchedulerError::TaskNotRunning`].
    pub fn mark_complete(&self, task: T, error: Option<Report>) -> Result<(), SchedulerError> {
        let key = (self.key_of)(&task);
        let mut inner = self.lock();
        debug!(%key, failed = error.is_some(), "TaskQueue::mark_complete: called");

        let remaining = {
            let count = inner
                .running
                .get_mut(&key)
                .ok_or_else(|| SchedulerError::TaskNotRunning { key: key.clone() })?;
            *count -= 1;
            *count
        };
        if remaining == 0 {
            inner.running.remove(&key);
        }

        // Re-entry goes to the back of the rotation; over many completions
        // this is what rotates the global budget across keys.
        if !inner.available.contains(&key)
            && self.key_has_capacity(&inner, &key)
            && inner.pending.contains_key(&key)
        {
            debug!(%key, "TaskQueue::mark_complete: key available again");
            inner.available.push_back(&key);
        }

        if let Some(err) = error {
            if inner.first_error.is_none() {
                debug!(%key, error = %err, "TaskQueue::mark_complete: recording first error");
                inner.first_error = Some(err);
                self.error_notify.notify_one();
            } else {
                warn!(%key, error = %err, "task failed after first recorded error");
            }
        }

        inner.tracker.on_complete(&task);
        self.scan(&mut inner);
        self.check_drain(&mut inner);
        Ok(())
    }

    /// Arm the drain notification for the current cycle.
    ///
    /// The receiver resolves exactly once, when every enqueued task has
    /// completed after at least one `run`, with the first task error observed
    /// or `Ok(())`. Arming on an already-drained queue delivers immediately;
    /// adding more tasks afterwards re-arms drain detection against the new
    /// total, so reuse for a second batch is a matter of arming a fresh
    /// receiver. Arming replaces any previously armed, undelivered receiver.
    pub fn on_drain(&self) -> oneshot::Receiver<Result<(), Report>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if inner.drain_tx.replace(tx).is_some() {
            debug!("TaskQueue::on_drain: replacing previously armed receiver");
        }
        self.check_drain(&mut inner);
        rx
    }

    /// Snapshot of the lifecycle counters
    pub fn counts(&self) -> ProgressCounts {
        self.lock().tracker.counts()
    }

    /// The queue's concurrency limits
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Resolves when a first error has been recorded. Used by the executor
    /// adapter's fail-fast wait; pairs with [`take_first_error`](Self::take_first_error).
    pub(crate) async fn error_signalled(&self) {
        self.error_notify.notified().await;
    }

    /// Take the recorded first error, if a drain delivery has not already
    /// consumed it.
    pub(crate) fn take_first_error(&self) -> Option<Report> {
        self.lock().first_error.take()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_has_capacity(&self, inner: &QueueInner<T>, key: &str) -> bool {
        inner.running.get(key).copied().unwrap_or(0) < self.config.key_parallelism
    }

    /// Admit every currently admissible task in one pass
    fn scan(&self, inner: &mut QueueInner<T>) {
        loop {
            match self.dequeue(inner) {
                Dequeue::Admit { key, task } => self.admit(inner, key, task),
                Dequeue::AtCapacity | Dequeue::Exhausted => break,
            }
        }
    }

    fn dequeue(&self, inner: &mut QueueInner<T>) -> Dequeue<T> {
        if self.config.overall_cap_reached(inner.tracker.counts().running) {
            return Dequeue::AtCapacity;
        }
        loop {
            let Some(key) = inner.available.front() else {
                return Dequeue::Exhausted;
            };
            match inner.pending.get_mut(&key).and_then(Vec::pop) {
                Some(task) => {
                    // Empty buckets are removed eagerly; the rotation entry
                    // becomes stale and is cleaned up on the next pass.
                    if inner.pending.get(&key).is_some_and(Vec::is_empty) {
                        inner.pending.remove(&key);
                    }
                    return Dequeue::Admit { key, task };
                }
                None => {
                    // Stale rotation entry: the key kept spare capacity while
                    // its bucket emptied.
                    debug!(%key, "TaskQueue::dequeue: dropping exhausted key");
                    inner.pending.remove(&key);
                    inner.available.remove(&key);
                }
            }
        }
    }

    fn admit(&self, inner: &mut QueueInner<T>, key: String, task: T) {
        let count = {
            let count = inner.running.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if count >= self.config.key_parallelism {
            debug!(%key, "TaskQueue::admit: key saturated");
            inner.available.remove(&key);
        }
        inner.tracker.on_start(&task);
        debug!(%key, running = inner.tracker.counts().running, "TaskQueue::admit: starting task");
        self.starter.start(&key, task);
    }

    fn check_drain(&self, inner: &mut QueueInner<T>) {
        if !inner.started {
            return;
        }
        let counts = inner.tracker.counts();
        if counts.completed != counts.total {
            return;
        }
        if let Some(tx) = inner.drain_tx.take() {
            let result = match inner.first_error.take() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            debug!(total = counts.total, ok = result.is_ok(), "TaskQueue::check_drain: drained");
            let _ = tx.send(result);
        }
    }
}
