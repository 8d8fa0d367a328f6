//! Queue configuration

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Concurrency limits for a [`TaskQueue`](crate::TaskQueue).
///
/// `key_parallelism` caps how many tasks sharing one key may run at once;
/// `overall_parallelism` caps how many tasks may run across all keys, with
/// `None` meaning unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max concurrently running tasks per key
    #[serde(default = "default_key_parallelism")]
    pub key_parallelism: usize,

    /// Max concurrently running tasks across all keys (`None` = no limit)
    #[serde(default)]
    pub overall_parallelism: Option<usize>,
}

fn default_key_parallelism() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_parallelism: 1,
            overall_parallelism: None,
        }
    }
}

impl QueueConfig {
    /// Config with a per-key cap and no overall limit
    pub fn per_key(key_parallelism: usize) -> Self {
        Self {
            key_parallelism,
            overall_parallelism: None,
        }
    }

    /// Config with both a per-key and an overall cap
    pub fn new(key_parallelism: usize, overall_parallelism: usize) -> Self {
        Self {
            key_parallelism,
            overall_parallelism: Some(overall_parallelism),
        }
    }

    /// Reject non-positive limits. Both caps must be at least 1; an absent
    /// overall cap means unlimited.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.key_parallelism == 0 {
            return Err(SchedulerError::InvalidKeyParallelism);
        }
        if self.overall_parallelism == Some(0) {
            return Err(SchedulerError::InvalidOverallParallelism);
        }
        Ok(())
    }

    /// True if the overall cap is set and `running` has reached it
    pub(crate) fn overall_cap_reached(&self, running: usize) -> bool {
        match self.overall_parallelism {
            Some(limit) => running >= limit,
            None => false,
        }
    }
}
