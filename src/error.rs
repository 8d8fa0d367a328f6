//! Scheduler error types
//!
//! These cover misuse of the queue by its host — programming errors, distinct
//! from task-level failures, which are opaque [`eyre::Report`]s carried to the
//! drain notification.

use thiserror::Error;

/// Errors raised by the queue itself
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("key parallelism must be at least 1")]
    InvalidKeyParallelism,

    #[error("overall parallelism must be at least 1 when set")]
    InvalidOverallParallelism,

    #[error("no running task for key '{key}'")]
    TaskNotRunning { key: String },
}
