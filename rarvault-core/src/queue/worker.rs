//! Worker algorithm for one dequeued item (spec.md §4.4, "conceptual, not
//! prescriptive").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::archive::volumes::resolve_volumes;
use crate::archive::ArchiveReader;
use crate::config::{MediaFilterConfig, RetryPolicy};
use crate::disposer::ArchiveDisposer;
use crate::error::{ArchiveError, RarvaultError, Result};
use crate::fsutil::rename_or_copy;
use crate::notifier::LibraryNotifier;
use crate::strategy::{MaterializationStrategy, MaterializeOutcome, MaterializeRequest};
use crate::types::ProcessingMode;

use super::item::QueueItem;
use super::WorkerOutcome;

pub struct WorkerContext {
    pub reader: Arc<dyn ArchiveReader>,
    pub strategies: HashMap<ProcessingMode, Arc<MaterializationStrategy>>,
    pub notifier: Option<Arc<LibraryNotifier>>,
    pub disposer: Arc<ArchiveDisposer>,
    pub media_filter: MediaFilterConfig,
    pub retry_policy: RetryPolicy,
    pub archive_test_timeout: Duration,
    pub failed_dir: PathBuf,
}

/// Quarantine: move the whole archive set into `failed/`, preserving its
/// name (spec.md §7 "quarantine moves the entire archive set into `failed/`
/// preserving its name").
pub async fn quarantine_to_failed(item: &QueueItem, failed_dir: &std::path::Path) {
    let volumes = resolve_volumes(item.handle.first_volume());
    for volume in &volumes {
        let Some(file_name) = volume.file_name() else { continue };
        let destination = failed_dir.join(file_name);
        if let Err(e) = quarantine_one(volume, &destination).await {
            warn!(path = %volume.display(), error = %e, "failed to quarantine archive volume");
        }
    }
}

async fn quarantine_one(volume: &std::path::Path, destination: &std::path::Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    rename_or_copy(volume, destination).await
}

/// Whether a transient error should retry (bounded by policy) or quarantine
/// immediately (spec.md §7).
fn is_transient(err: &RarvaultError) -> bool {
    matches!(
        err,
        RarvaultError::Archive(ArchiveError::MissingVolume(_))
            | RarvaultError::Archive(ArchiveError::Corrupt(_))
            | RarvaultError::Archive(ArchiveError::Timeout)
            | RarvaultError::Archive(ArchiveError::Io(_))
            | RarvaultError::Io(_)
    )
}

fn retry_or_quarantine(item: &QueueItem, retry_policy: &RetryPolicy, reason: &str) -> WorkerOutcome {
    if item.retry_budget_exhausted(retry_policy.max_retry_attempts, retry_policy.max_retry_age_hours) {
        warn!(handle = %item.handle, reason, "retry budget exhausted, quarantining");
        WorkerOutcome::Quarantined
    } else {
        info!(handle = %item.handle, attempt = item.attempts + 1, reason, "scheduling retry");
        WorkerOutcome::Retry { delay: retry_policy.retry_interval }
    }
}

pub async fn process_item(item: &QueueItem, ctx: &WorkerContext) -> WorkerOutcome {
    let session = match ctx.reader.open(item.handle.first_volume()).await {
        Ok(session) => session,
        Err(e) if is_transient(&e) => return retry_or_quarantine(item, &ctx.retry_policy, "open failed"),
        Err(e) => {
            warn!(handle = %item.handle, error = %e, "archive open failed fatally");
            return WorkerOutcome::Quarantined;
        }
    };

    let test_outcome = match session.test(ctx.archive_test_timeout).await {
        Ok(outcome) => outcome,
        Err(e) if is_transient(&e) => return retry_or_quarantine(item, &ctx.retry_policy, "integrity test failed"),
        Err(_) => return WorkerOutcome::Quarantined,
    };

    match test_outcome {
        crate::archive::TestOutcome::Encrypted => {
            info!(handle = %item.handle, "archive is encrypted, quarantining without retry");
            return WorkerOutcome::Quarantined;
        }
        crate::archive::TestOutcome::Corrupt => {
            return retry_or_quarantine(item, &ctx.retry_policy, "integrity test reported corruption");
        }
        crate::archive::TestOutcome::Ok => {}
    }

    let entries = match session.entries().await {
        Ok(entries) => entries,
        Err(e) if is_transient(&e) => return retry_or_quarantine(item, &ctx.retry_policy, "enumeration failed"),
        Err(_) => return WorkerOutcome::Quarantined,
    };

    let candidates: Vec<_> = entries
        .into_iter()
        .filter(|e| ctx.media_filter.is_candidate(&e.path, e.size))
        .collect();

    let volumes: Vec<PathBuf> = resolve_volumes(item.handle.first_volume());

    if candidates.is_empty() {
        info!(handle = %item.handle, "no media entries survived the filter, disposing without notifying");
        if let Err(e) = ctx.disposer.dispose(&item.source.source, &volumes).await {
            warn!(handle = %item.handle, error = %e, "disposal of empty archive failed");
        }
        return WorkerOutcome::Done;
    }

    let Some(strategy) = ctx.strategies.get(&item.source.strategy) else {
        warn!(handle = %item.handle, strategy = %item.source.strategy, "no strategy configured for this mode");
        return WorkerOutcome::Quarantined;
    };

    let mut materialized = 0usize;
    for entry in &candidates {
        let request = MaterializeRequest {
            handle: &item.handle,
            session: session.as_ref(),
            entry,
            target_directory: &item.source.target,
            library_id: &item.source.library_id,
        };
        match strategy.materialize(request).await {
            Ok(MaterializeOutcome::Created(_)) => materialized += 1,
            Ok(MaterializeOutcome::SkippedDuplicate) => {}
            Err(e) => {
                warn!(handle = %item.handle, entry = %entry.path, error = %e, "materialization failed, quarantining archive set");
                return WorkerOutcome::Quarantined;
            }
        }
    }

    if let Some(notifier) = &ctx.notifier {
        notifier.notify(&item.source.library_id).await;
    }
    if let Err(e) = ctx.disposer.dispose(&item.source.source, &volumes).await {
        warn!(handle = %item.handle, error = %e, "disposal failed after successful materialization");
    }

    info!(
        handle = %item.handle,
        source = %item.source.label,
        entries = candidates.len(),
        materialized,
        label = %item.label,
        "archive set processed"
    );
    WorkerOutcome::Done
}
