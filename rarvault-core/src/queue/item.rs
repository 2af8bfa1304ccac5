//! Queue item and its state machine (spec.md §4.4).

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::SourceConfig;
use crate::types::{ArchiveSetHandle, SourceLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Pending,
    Running,
    RetryScheduled,
}

/// One archive set moving through the queue. `attempts` counts worker
/// dequeues that ended in a retry, not the current attempt.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub handle: ArchiveSetHandle,
    pub source: SourceConfig,
    pub label: SourceLabel,
    pub state: QueueState,
    pub attempts: u32,
    pub first_submitted_at: DateTime<Utc>,
    pub next_due: Instant,
}

impl QueueItem {
    pub fn new(handle: ArchiveSetHandle, source: SourceConfig, label: SourceLabel) -> Self {
        Self {
            handle,
            source,
            label,
            state: QueueState::Pending,
            attempts: 0,
            first_submitted_at: Utc::now(),
            next_due: Instant::now(),
        }
    }

    /// True once retry bounds have been exceeded (spec.md P5).
    pub fn retry_budget_exhausted(&self, max_attempts: u32, max_age_hours: u64) -> bool {
        if self.attempts >= max_attempts {
            return true;
        }
        let age = Utc::now().signed_duration_since(self.first_submitted_at);
        age.num_hours() >= max_age_hours as i64
    }
}

/// Min-heap ordering by `next_due` for the retry "due" heap (spec.md §9
/// "Retry bookkeeping").
#[derive(Debug)]
pub struct Scheduled(pub QueueItem);

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.0.next_due == other.0.next_due
    }
}
impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest due item first.
        other.0.next_due.cmp(&self.0.next_due)
    }
}
