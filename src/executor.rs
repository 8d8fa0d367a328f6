//! Executor adapter
//!
//! Binds a caller-supplied asynchronous executor to the queue's starter seam:
//! each admitted task is spawned onto the runtime, and the executor's outcome
//! is fed back through [`TaskQueue::mark_complete`]. The adapter holds no
//! state of its own beyond the executor.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::SchedulerError;
use crate::progress::{CountingTracker, ProgressCounts};
use crate::queue::{TaskQueue, TaskStarter};

/// An opaque asynchronous operation invoked once per admitted task.
///
/// May be invoked many times concurrently, up to the combined effect of both
/// concurrency caps. A returned error marks that task as failed; it does not
/// stop other work.
#[async_trait]
pub trait TaskExecutor<T>: Send + Sync {
    async fn execute(&self, task: &T) -> eyre::Result<()>;
}

/// A [`TaskQueue`] wired to a [`TaskExecutor`].
///
/// Must be created inside a tokio runtime; admitted tasks are spawned onto it.
pub struct ExecutorQueue<T> {
    queue: TaskQueue<T>,
}

/// Starter that spawns the executor and reports its outcome back to the
/// queue. Holds a weak self-reference so in-flight tasks do not keep a
/// dropped queue alive.
struct SpawnStarter<T, E> {
    executor: Arc<E>,
    queue: Weak<ExecutorQueue<T>>,
}

impl<T, E> TaskStarter<T> for SpawnStarter<T, E>
where
    T: Send + Sync + 'static,
    E: TaskExecutor<T> + 'static,
{
    fn start(&self, key: &str, task: T) {
        let executor = Arc::clone(&self.executor);
        let queue = Weak::clone(&self.queue);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = executor.execute(&task).await;
            let Some(queue) = queue.upgrade() else {
                debug!(%key, "queue dropped before task completion");
                return;
            };
            if let Err(err) = queue.queue.mark_complete(task, outcome.err()) {
                warn!(%key, error = %err, "completion rejected");
            }
        });
    }
}

impl<T> ExecutorQueue<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<F, E>(key_of: F, executor: E, config: QueueConfig) -> Result<Arc<Self>, SchedulerError>
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
        E: TaskExecutor<T> + 'static,
    {
        config.validate()?;
        let executor = Arc::new(executor);
        Ok(Arc::new_cyclic(|weak| Self {
            queue: TaskQueue::from_validated(
                Box::new(key_of),
                Box::new(SpawnStarter {
                    executor,
                    queue: weak.clone(),
                }),
                config,
                Box::new(CountingTracker::new()),
            ),
        }))
    }

    /// Enqueue a task; see [`TaskQueue::add`]
    pub fn add(&self, task: T) {
        self.queue.add(task);
    }

    /// Enqueue tasks in order; see [`TaskQueue::add_all`]
    pub fn add_all<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.queue.add_all(tasks);
    }

    /// Start admitting tasks; see [`TaskQueue::run`]
    pub fn run(&self) {
        self.queue.run();
    }

    /// Snapshot of the lifecycle counters
    pub fn counts(&self) -> ProgressCounts {
        self.queue.counts()
    }

    /// The underlying queue, for drain signaling beyond [`wait`](Self::wait)
    pub fn queue(&self) -> &TaskQueue<T> {
        &self.queue
    }

    /// Wait for the current batch, failing fast.
    ///
    /// Resolves with the first task error as soon as it is observed, without
    /// waiting for unrelated in-flight work; the queue keeps admitting and
    /// running the remaining tasks in the background. If no task fails, this
    /// resolves with `Ok(())` once every enqueued task has completed.
    pub async fn wait(&self) -> eyre::Result<()> {
        let mut drain = self.queue.on_drain();
        loop {
            tokio::select! {
                result = &mut drain => {
                    // A closed channel means the receiver was superseded by a
                    // newer waiter; treat it as an uneventful drain.
                    return result.unwrap_or(Ok(()));
                }
                _ = self.queue.error_signalled() => {
                    if let Some(err) = self.queue.take_first_error() {
                        return Err(err);
                    }
                    // The drain delivery consumed the error first; loop and
                    // pick it up from the drain receiver.
                }
            }
        }
    }
}

/// Run a batch of tasks to completion under the given limits.
///
/// One-shot convenience over [`ExecutorQueue`]: enqueues everything, starts
/// the queue and waits fail-fast. On error, in-flight tasks are left to
/// finish in the background and further pending tasks are abandoned along
/// with the queue.
pub async fn execute_all<T, F, E>(
    tasks: Vec<T>,
    key_of: F,
    executor: E,
    config: QueueConfig,
) -> eyre::Result<()>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> String + Send + Sync + 'static,
    E: TaskExecutor<T> + 'static,
{
    let queue = ExecutorQueue::new(key_of, executor, config)?;
    queue.add_all(tasks);
    queue.run();
    queue.wait().await
}
