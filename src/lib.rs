//! keyfan - keyed fan-out task queue with dual concurrency caps
//!
//! Runs a collection of asynchronous tasks under two simultaneous limits: at
//! most `key_parallelism` tasks sharing one classification key, and at most
//! `overall_parallelism` tasks across all keys. Used to throttle fan-out work
//! against a resource pool partitioned by key (one target host per key, say)
//! without starving any key and without exceeding global capacity.
//!
//! # Core Concepts
//!
//! - **Admission scan**: on every state change, a tight loop starts all
//!   currently admissible pending tasks given both caps
//! - **Key fairness**: candidate keys rotate in insertion order; a saturated
//!   key re-enters at the back once capacity frees, so no key monopolizes the
//!   global budget
//! - **LIFO per key**: under backlog, the most recently enqueued task for a
//!   key is admitted next
//! - **Exactly-once drain**: a single-shot notification fires when every
//!   enqueued task has completed, carrying the first task error if any
//!
//! # Modules
//!
//! - [`queue`] - admission, fairness and drain signaling core
//! - [`executor`] - adapter binding an async executor, plus [`execute_all`]
//! - [`progress`] - lifecycle counters and the tracker trait
//! - [`config`] - concurrency limits
//! - [`error`] - programming-error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use keyfan::{QueueConfig, TaskExecutor, execute_all};
//!
//! struct Fetch;
//!
//! #[async_trait]
//! impl TaskExecutor<String> for Fetch {
//!     async fn execute(&self, url: &String) -> eyre::Result<()> {
//!         // fetch `url`...
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo(urls: Vec<String>) -> eyre::Result<()> {
//! // at most 2 in flight per host, 8 overall
//! execute_all(
//!     urls,
//!     |url: &String| url.split('/').nth(2).unwrap_or_default().to_string(),
//!     Fetch,
//!     QueueConfig::new(2, 8),
//! )
//! .await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
mod keys;
pub mod progress;
pub mod queue;

pub use config::QueueConfig;
pub use error::SchedulerError;
pub use executor::{ExecutorQueue, TaskExecutor, execute_all};
pub use progress::{CountingTracker, ProgressCounts, ProgressTracker};
pub use queue::{TaskQueue, TaskStarter};
