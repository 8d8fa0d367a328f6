//! Progress tracking for task lifecycles
//!
//! The queue reports every lifecycle transition to a [`ProgressTracker`], and
//! reads the authoritative counts back from it for admission and drain
//! decisions. [`CountingTracker`] is the default implementation; custom
//! trackers compose it to record extra bookkeeping (tests use this to assert
//! exact membership, not just counts).

/// Snapshot of the queue's four lifecycle counters.
///
/// Invariant: `enqueued + running + completed == total` after every queue
/// operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCounts {
    /// Tasks ever enqueued
    pub total: usize,
    /// Enqueued, not yet started
    pub enqueued: usize,
    /// Started, not yet completed
    pub running: usize,
    /// Finished, success or failure
    pub completed: usize,
}

impl ProgressCounts {
    pub fn new(total: usize, enqueued: usize, running: usize, completed: usize) -> Self {
        Self {
            total,
            enqueued,
            running,
            completed,
        }
    }
}

/// Lifecycle hooks plus authoritative counts.
///
/// Preconditions are the caller's responsibility: `on_start` for a task that
/// was enqueued and not yet started, `on_complete` for a started task. The
/// tracker does not defend against misuse; [`CountingTracker`] panics on
/// counter underflow rather than corrupting counts silently.
pub trait ProgressTracker<T>: Send {
    fn on_enqueue(&mut self, task: &T);
    fn on_start(&mut self, task: &T);
    fn on_complete(&mut self, task: &T);

    /// Snapshot of the four counters
    fn counts(&self) -> ProgressCounts;
}

/// Default tracker: maintains the four counters and nothing else
#[derive(Debug, Default)]
pub struct CountingTracker {
    counts: ProgressCounts,
}

impl CountingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&mut self) {
        self.counts.total += 1;
        self.counts.enqueued += 1;
    }

    pub fn record_start(&mut self) {
        self.counts.enqueued = self
            .counts
            .enqueued
            .checked_sub(1)
            .expect("start without matching enqueue");
        self.counts.running += 1;
    }

    pub fn record_complete(&mut self) {
        self.counts.running = self
            .counts
            .running
            .checked_sub(1)
            .expect("complete without matching start");
        self.counts.completed += 1;
    }

    pub fn counts(&self) -> ProgressCounts {
        self.counts
    }
}

impl<T> ProgressTracker<T> for CountingTracker {
    fn on_enqueue(&mut self, _task: &T) {
        self.record_enqueue();
    }

    fn on_start(&mut self, _task: &T) {
        self.record_start();
    }

    fn on_complete(&mut self, _task: &T) {
        self.record_complete();
    }

    fn counts(&self) -> ProgressCounts {
        self.counts
    }
}
