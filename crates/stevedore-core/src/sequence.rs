//! Scheduler-owned identifier sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ContainerId;

/// Monotonic sequence for container identifiers.
///
/// Constructed once and owned by the scheduler instance; there is no
/// process-wide counter, so two schedulers in one process never share
/// or collide on a sequence.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value in the sequence, starting at 1.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mint a fresh container id.
    pub fn next_container_id(&self) -> ContainerId {
        ContainerId(format!("container-{}", self.next()))
    }
}
