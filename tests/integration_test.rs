//! Integration tests for keyfan
//!
//! These drive full queues through the executor adapter and verify the
//! observable admission order, both concurrency caps, fail-fast error
//! delivery and queue reuse.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eyre::eyre;
use keyfan::{ExecutorQueue, ProgressCounts, QueueConfig, TaskExecutor, execute_all};

// =============================================================================
// Start-order recording
// =============================================================================

/// Records, per task value, the global order in which executions began.
#[derive(Default)]
struct Recorder {
    next_index: usize,
    order: HashMap<String, Vec<usize>>,
}

struct RecordingExecutor {
    state: Arc<Mutex<Recorder>>,
}

#[async_trait]
impl TaskExecutor<String> for RecordingExecutor {
    async fn execute(&self, task: &String) -> eyre::Result<()> {
        {
            let mut recorder = self.state.lock().unwrap();
            let index = recorder.next_index;
            recorder.next_index += 1;
            recorder.order.entry(task.clone()).or_default().push(index);
        }
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Run every whitespace-separated item as a task keyed by its own value and
/// return the recorded start orders.
async fn run_recorded(
    items: &str,
    key_parallelism: usize,
    overall: usize,
) -> HashMap<String, Vec<usize>> {
    let tasks: Vec<String> = items.split_whitespace().map(String::from).collect();
    let state = Arc::new(Mutex::new(Recorder::default()));
    let executor = RecordingExecutor {
        state: Arc::clone(&state),
    };
    execute_all(
        tasks,
        |task: &String| task.clone(),
        executor,
        QueueConfig::new(key_parallelism, overall),
    )
    .await
    .expect("no task fails");

    let recorder = state.lock().unwrap();
    recorder.order.clone()
}

fn expected(pairs: &[(&str, &[usize])]) -> HashMap<String, Vec<usize>> {
    pairs
        .iter()
        .map(|(key, indices)| (key.to_string(), indices.to_vec()))
        .collect()
}

#[tokio::test]
async fn test_empty_batch_does_nothing() {
    let order = run_recorded("", 1, 1).await;
    assert!(order.is_empty());
}

#[tokio::test]
async fn test_single_task() {
    let order = run_recorded("a", 1, 1).await;
    assert_eq!(order, expected(&[("a", &[0])]));
}

#[tokio::test]
async fn test_tasks_run_in_series() {
    let order = run_recorded("a b c", 1, 1).await;
    assert_eq!(order, expected(&[("a", &[0]), ("b", &[1]), ("c", &[2])]));
}

#[tokio::test]
async fn test_tasks_run_in_parallel() {
    let order = run_recorded("a b c", 1, 2).await;
    assert_eq!(order, expected(&[("a", &[0]), ("b", &[1]), ("c", &[2])]));
}

#[tokio::test]
async fn test_work_distributes_across_keys() {
    // Two a's burst first, b fills the remaining global capacity, the third
    // a is admitted once an a-slot frees.
    let order = run_recorded("a a a b", 2, 4).await;
    assert_eq!(order, expected(&[("a", &[0, 1, 3]), ("b", &[2])]));
}

#[tokio::test]
async fn test_work_distributes_evenly() {
    let order = run_recorded("a b c b c c b d b a a a b b", 2, 5).await;
    assert_eq!(
        order,
        expected(&[
            ("a", &[0, 1, 7, 8]),
            ("b", &[2, 3, 9, 10, 12, 13]),
            ("c", &[4, 5, 11]),
            ("d", &[6]),
        ])
    );
}

// =============================================================================
// Concurrency caps under load
// =============================================================================

const FUZZ_KEY_PARALLELISM: usize = 3;
const FUZZ_OVERALL: usize = 10;

struct CapCheckingExecutor {
    under_way: AtomicUsize,
    per_key: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl TaskExecutor<usize> for CapCheckingExecutor {
    async fn execute(&self, task: &usize) -> eyre::Result<()> {
        let key = (task % 5).to_string();
        let running = self.under_way.fetch_add(1, Ordering::SeqCst) + 1;
        if running > FUZZ_OVERALL {
            return Err(eyre!("overall cap exceeded: {running}"));
        }
        {
            let mut per_key = self.per_key.lock().unwrap();
            let count = per_key.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count > FUZZ_KEY_PARALLELISM {
                return Err(eyre!("key cap exceeded for {key}: {count}"));
            }
        }

        tokio::time::sleep(Duration::from_millis(1 + (task * 7) as u64 % 20)).await;

        *self.per_key.lock().unwrap().get_mut(&key).unwrap() -= 1;
        self.under_way.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_caps_hold_under_load() {
    let queue = ExecutorQueue::new(
        |task: &usize| (task % 5).to_string(),
        CapCheckingExecutor {
            under_way: AtomicUsize::new(0),
            per_key: Mutex::new(HashMap::new()),
        },
        QueueConfig::new(FUZZ_KEY_PARALLELISM, FUZZ_OVERALL),
    )
    .expect("valid config");

    queue.add_all(0..100);
    queue.run();
    queue.wait().await.expect("no cap is exceeded");

    assert_eq!(queue.counts(), ProgressCounts::new(100, 0, 0, 100));
}

// =============================================================================
// Fail-fast error delivery
// =============================================================================

struct FailingExecutor {
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskExecutor<usize> for FailingExecutor {
    async fn execute(&self, task: &usize) -> eyre::Result<()> {
        if *task == 10 {
            return Err(eyre!("task 10 failed"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_error_surfaces_before_unrelated_work_finishes() {
    let finished = Arc::new(AtomicUsize::new(0));
    let queue = ExecutorQueue::new(
        |task: &usize| (task % 5).to_string(),
        FailingExecutor {
            finished: Arc::clone(&finished),
        },
        QueueConfig::new(2, 5),
    )
    .expect("valid config");

    queue.add_all(0..100);
    queue.run();

    let err = queue.wait().await.expect_err("failure is delivered early");
    assert!(err.to_string().contains("task 10"));

    // Tasks 0 and 5 share key 0 and sit behind task 10 in LIFO order, so the
    // error arrived while unrelated work was still in flight.
    assert!(finished.load(Ordering::SeqCst) < 99);
    assert!(queue.counts().completed < 100);

    // The failure halted nothing: the queue still runs the batch to the end.
    queue.wait().await.expect("remaining tasks complete cleanly");
    assert_eq!(queue.counts(), ProgressCounts::new(100, 0, 0, 100));
    assert_eq!(finished.load(Ordering::SeqCst), 99);
}

// =============================================================================
// Queue reuse across batches
// =============================================================================

#[tokio::test]
async fn test_second_batch_after_drain() {
    let state = Arc::new(Mutex::new(Recorder::default()));
    let queue = ExecutorQueue::new(
        |task: &String| task.clone(),
        RecordingExecutor {
            state: Arc::clone(&state),
        },
        QueueConfig::new(1, 2),
    )
    .expect("valid config");

    queue.add_all(["a".to_string(), "b".to_string()]);
    queue.run();
    queue.wait().await.expect("first batch drains");
    assert_eq!(queue.counts(), ProgressCounts::new(2, 0, 0, 2));

    queue.add_all(["a".to_string(), "c".to_string()]);
    queue.wait().await.expect("second batch drains");
    assert_eq!(queue.counts(), ProgressCounts::new(4, 0, 0, 4));

    let recorder = state.lock().unwrap();
    assert_eq!(recorder.order["a"], vec![0, 2]);
    assert_eq!(recorder.order["b"], vec![1]);
    assert_eq!(recorder.order["c"], vec![3]);
}
