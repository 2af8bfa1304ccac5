//! Processing Queue (spec.md §4.4): the single-worker state machine sitting
//! between the Directory Watcher and the materialization strategies.
//!
//! Collapsed from the teacher's actor/event-bus orchestration
//! (`ferrex-core::orchestration`) to one worker, per spec.md §4.4's explicit
//! rejection of parallel workers — the queue itself stays the teacher's
//! central synchronization point, just with a single consumer.

pub mod item;
pub mod worker;

use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::ArchiveSetHandle;
use crate::watch::CandidateEvent;

use self::item::{QueueItem, QueueState, Scheduled};
use self::worker::{process_item, quarantine_to_failed, WorkerContext};

/// Outcome the worker reports back to the queue after handling one item.
pub enum WorkerOutcome {
    Done,
    Retry { delay: std::time::Duration },
    Quarantined,
}

/// In-memory queue. Durability is by design only at the filesystem level
/// (quarantine moves files into `failed/`); an in-flight item lost to a
/// process crash is simply rediscovered by the next startup scan.
pub struct ProcessingQueue {
    pending: VecDeque<QueueItem>,
    retry_heap: BinaryHeap<Scheduled>,
    in_flight: HashSet<ArchiveSetHandle>,
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            retry_heap: BinaryHeap::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Submit a newly discovered candidate. Drops and logs if the handle is
    /// already in a non-terminal state anywhere in the queue (spec.md P4).
    pub fn submit(&mut self, event: CandidateEvent) {
        if self.in_flight.contains(&event.handle) {
            debug!(handle = %event.handle, "duplicate submission dropped");
            return;
        }
        self.in_flight.insert(event.handle.clone());
        self.pending
            .push_back(QueueItem::new(event.handle, event.source, event.label));
    }

    /// Move any retry-scheduled items whose delay has elapsed back to `Pending`.
    pub fn promote_due_retries(&mut self, now: Instant) {
        while let Some(scheduled) = self.retry_heap.peek() {
            if scheduled.0.next_due > now {
                break;
            }
            let Scheduled(mut item) = self.retry_heap.pop().unwrap();
            item.state = QueueState::Pending;
            self.pending.push_back(item);
        }
    }

    /// Duration until the next retry becomes due, if any — used to size the
    /// worker's select timeout so retries aren't starved by an idle `pending`.
    pub fn next_retry_deadline(&self) -> Option<Instant> {
        self.retry_heap.peek().map(|s| s.0.next_due)
    }

    /// Pop the next item to run. At most one item is ever dequeued without a
    /// matching `complete`/`retry`/`quarantine` call (spec.md P3).
    pub fn dequeue(&mut self) -> Option<QueueItem> {
        let mut item = self.pending.pop_front()?;
        item.state = QueueState::Running;
        Some(item)
    }

    /// Item finished successfully; release its handle.
    pub fn complete(&mut self, item: &QueueItem) {
        self.in_flight.remove(&item.handle);
    }

    /// Item needs quarantine; release its handle (the caller is responsible
    /// for the filesystem move into `failed/`).
    pub fn quarantine(&mut self, item: &QueueItem) {
        warn!(handle = %item.handle, attempts = item.attempts, "quarantining archive set");
        self.in_flight.remove(&item.handle);
    }

    /// Item failed transiently; re-schedule after `delay`, bumping attempts.
    pub fn retry(&mut self, mut item: QueueItem, delay: std::time::Duration) {
        item.attempts += 1;
        item.state = QueueState::RetryScheduled;
        item.next_due = Instant::now() + delay;
        self.retry_heap.push(Scheduled(item));
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.retry_heap.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Run the single worker until `shutdown` fires. The current item is given
/// `shutdown_grace` to finish once shutdown is requested; past that, the
/// loop stops waiting and returns regardless, leaving the item for the next
/// startup scan to rediscover (spec.md §5 "Cancellation").
pub async fn run(
    mut queue: ProcessingQueue,
    mut candidates_rx: mpsc::Receiver<CandidateEvent>,
    ctx: Arc<WorkerContext>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
) {
    loop {
        queue.promote_due_retries(Instant::now());

        if let Some(item) = queue.dequeue() {
            let outcome = run_with_grace(&item, &ctx, &shutdown, shutdown_grace).await;
            match outcome {
                WorkerOutcome::Done => queue.complete(&item),
                WorkerOutcome::Quarantined => {
                    queue.quarantine(&item);
                    quarantine_to_failed(&item, &ctx.failed_dir).await;
                }
                WorkerOutcome::Retry { delay } => queue.retry(item, delay),
            }
            if shutdown.is_cancelled() {
                break;
            }
            continue;
        }

        let wake_at = queue.next_retry_deadline();
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("processing queue shutting down, nothing in flight");
                break;
            }
            event = candidates_rx.recv() => {
                match event {
                    Some(event) => queue.submit(event),
                    None => break,
                }
            }
            _ = sleep_until_or_pending(wake_at) => {}
        }
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}

/// Drive `process_item`, racing it against the shutdown grace period once
/// cancellation has been requested.
async fn run_with_grace(
    item: &QueueItem,
    ctx: &WorkerContext,
    shutdown: &CancellationToken,
    grace: Duration,
) -> WorkerOutcome {
    let processing = process_item(item, ctx);
    tokio::pin!(processing);

    tokio::select! {
        outcome = &mut processing => outcome,
        _ = shutdown.cancelled() => {
            warn!(handle = %item.handle, "shutdown requested mid-item, waiting up to grace period");
            match tokio::time::timeout(grace, processing).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(handle = %item.handle, "grace period elapsed, abandoning item for next startup scan");
                    WorkerOutcome::Retry { delay: Duration::ZERO }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::types::{ProcessingMode, SourceLabel};
    use std::path::PathBuf;

    fn source() -> SourceConfig {
        SourceConfig {
            label: "movies".into(),
            source: PathBuf::from("/src"),
            target: PathBuf::from("/dst"),
            library_id: "1".into(),
            strategy: ProcessingMode::Extract,
            enabled: true,
            recursive: false,
        }
    }

    fn event(path: &str) -> CandidateEvent {
        CandidateEvent {
            handle: ArchiveSetHandle::new(PathBuf::from(path)),
            source: source(),
            label: SourceLabel::New,
        }
    }

    #[test]
    fn duplicate_handle_submission_is_dropped() {
        let mut q = ProcessingQueue::new();
        q.submit(event("/src/a.rar"));
        q.submit(event("/src/a.rar"));
        assert_eq!(q.in_flight_count(), 1);
        let item = q.dequeue().unwrap();
        assert!(q.dequeue().is_none());
        q.complete(&item);
    }

    #[test]
    fn retry_does_not_release_the_handle() {
        let mut q = ProcessingQueue::new();
        q.submit(event("/src/a.rar"));
        let item = q.dequeue().unwrap();
        q.retry(item, std::time::Duration::from_secs(60));
        assert_eq!(q.in_flight_count(), 1);
        // A fresh submission for the same handle is still rejected while retrying.
        q.submit(event("/src/a.rar"));
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn retry_promotes_to_pending_once_due() {
        let mut q = ProcessingQueue::new();
        q.submit(event("/src/a.rar"));
        let item = q.dequeue().unwrap();
        q.retry(item, std::time::Duration::from_millis(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        q.promote_due_retries(Instant::now());
        let promoted = q.dequeue().unwrap();
        assert_eq!(promoted.attempts, 1);
    }

    #[test]
    fn quarantine_releases_the_handle_for_resubmission() {
        let mut q = ProcessingQueue::new();
        q.submit(event("/src/a.rar"));
        let item = q.dequeue().unwrap();
        q.quarantine(&item);
        q.submit(event("/src/a.rar"));
        assert_eq!(q.in_flight_count(), 1);
    }
}
