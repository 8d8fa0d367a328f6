//! FIFO rotation of candidate keys
//!
//! Keys eligible to receive the next admitted task, iterated in insertion
//! order. A key removed on saturation re-enters at the back when capacity
//! frees up, which is what rotates the global budget across keys over time.

use std::collections::{HashMap, VecDeque};

/// Insertion-ordered set of keys with O(1) front-peek, back-append,
/// membership test and removal.
///
/// Entries in the deque are stamped with a generation; removal only bumps the
/// live map, leaving a stale deque entry behind that [`front`](Self::front)
/// discards when it reaches it. Re-adding a removed key pushes a fresh
/// generation at the back, so the key's old position is never reused.
#[derive(Debug, Default)]
pub(crate) struct KeyRotation {
    order: VecDeque<(String, u64)>,
    live: HashMap<String, u64>,
    next_gen: u64,
}

impl KeyRotation {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.live.contains_key(key)
    }

    /// Append `key` at the back. No-op if the key is already present.
    pub(crate) fn push_back(&mut self, key: &str) -> bool {
        if self.live.contains_key(key) {
            return false;
        }
        let generation = self.next_gen;
        self.next_gen += 1;
        self.live.insert(key.to_string(), generation);
        self.order.push_back((key.to_string(), generation));
        true
    }

    /// Remove `key` from the rotation. The deque entry is left behind as a
    /// stale tombstone; `front` discards it later.
    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.live.remove(key).is_some()
    }

    /// Peek the front key in insertion order, discarding stale entries.
    pub(crate) fn front(&mut self) -> Option<String> {
        while let Some((key, generation)) = self.order.front() {
            match self.live.get(key) {
                Some(live_gen) if live_gen == generation => return Some(key.clone()),
                _ => {
                    self.order.pop_front();
                }
            }
        }
        None
    }
}
