use std::collections::VecDeque;

use crate::model::JobOutcome;

/// Number of finished jobs kept for display.
pub const HISTORY_CAPACITY: usize = 10;

/// Newest-first record of recent job outcomes.
///
/// Entries are never looked up again after insertion, so eviction is plain
/// FIFO: the oldest entry goes once capacity is exceeded.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<JobOutcome>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn record(&mut self, outcome: JobOutcome) {
        self.entries.push_front(outcome);
        self.entries.truncate(self.capacity);
    }

    /// Owned copy of the entries, newest first.
    pub fn snapshot(&self) -> Vec<JobOutcome> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&JobOutcome> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
