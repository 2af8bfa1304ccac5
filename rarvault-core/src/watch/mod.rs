//! Directory Watcher (spec.md §4.3).
//!
//! Generalizes the teacher's `FileWatcher`
//! (`ferrex-core::scanner::file_watcher`) from per-library video-file events
//! to per-archive-set candidate-ready events: a debounced `notify` watcher
//! per local source, a `PollWatcher` fallback for network filesystems, and a
//! stabilization loop that polls tracked sets until their volumes stop
//! changing.

pub mod stabilize;

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, NoCache};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::volumes::{handle_for_member, resolve_volumes};
use crate::config::{SourceConfig, StabilizationConfig};
use crate::error::{RarvaultError, Result};
use crate::types::{ArchiveSetHandle, SourceLabel};

use self::stabilize::SetTracker;

/// One archive set ready for queue submission, paired with the source tuple
/// that discovered it (spec.md §4.3 "emits `(archive_set_handle,
/// source_tuple)` events").
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    pub handle: ArchiveSetHandle,
    pub source: SourceConfig,
    pub label: SourceLabel,
}

enum LiveWatcher {
    Debounced(Debouncer<RecommendedWatcher, NoCache>),
    Poll(PollWatcher),
}

pub struct DirectoryWatcher {
    sources: Vec<SourceConfig>,
    stabilization: StabilizationConfig,
}

impl DirectoryWatcher {
    pub fn new(sources: Vec<SourceConfig>, stabilization: StabilizationConfig) -> Self {
        Self {
            sources,
            stabilization,
        }
    }

    /// Run the watcher until `shutdown` fires. Emits every discovered
    /// candidate on `tx`. If `scan_existing` is set, every archive set
    /// already present in every enabled source is submitted once up front
    /// with `SourceLabel::Existing` (spec.md §4.3 step 5).
    pub async fn run(
        &self,
        tx: mpsc::Sender<CandidateEvent>,
        scan_existing: bool,
        shutdown: CancellationToken,
    ) -> Result<()> {
        if scan_existing {
            for source in self.sources.iter().filter(|s| s.enabled) {
                for handle in scan_existing_sets(&source.source, source.recursive) {
                    let event = CandidateEvent {
                        handle,
                        source: source.clone(),
                        label: SourceLabel::Existing,
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        let (touch_tx, mut touch_rx) = mpsc::unbounded_channel::<(usize, PathBuf)>();
        let mut watchers = Vec::new();
        for (idx, source) in self.sources.iter().enumerate() {
            if !source.enabled {
                continue;
            }
            match start_watcher(idx, &source.source, source.recursive, touch_tx.clone()) {
                Ok(w) => watchers.push(w),
                Err(e) => {
                    error!(source = %source.label, error = %e, "failed to start directory watcher");
                    return Err(e);
                }
            }
        }
        drop(touch_tx);

        let mut trackers: HashMap<(usize, ArchiveSetHandle), SetTracker> = HashMap::new();
        let mut poll_interval = tokio::time::interval(self.stabilization.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("directory watcher shutting down");
                    break;
                }
                touched = touch_rx.recv() => {
                    let Some((idx, path)) = touched else { continue };
                    let Some(source) = self.sources.get(idx) else { continue };
                    let Some(handle_path) = handle_for_member(&path) else { continue };
                    let key = (idx, ArchiveSetHandle::new(handle_path.clone()));
                    trackers
                        .entry(key)
                        .and_modify(|t| t.volumes = resolve_volumes(&handle_path))
                        .or_insert_with(|| SetTracker::new(resolve_volumes(&handle_path)));
                }
                _ = poll_interval.tick() => {
                    let window = self.stabilization.file_stabilization_time;
                    let max_age = self.stabilization.max_file_age;
                    let mut done = Vec::new();
                    for (key, tracker) in trackers.iter_mut() {
                        if tracker.poll(window) || tracker.is_expired(max_age) {
                            done.push(key.clone());
                        }
                    }
                    for key in done {
                        let Some(tracker) = trackers.remove(&key) else { continue };
                        let (idx, handle) = key;
                        let Some(source) = self.sources.get(idx) else { continue };
                        debug!(handle = %handle, "archive set stabilized");
                        drop(tracker);
                        let event = CandidateEvent {
                            handle,
                            source: source.clone(),
                            label: SourceLabel::New,
                        };
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Enumerate every distinct archive set already present in `dir`, submitted
/// once at startup regardless of stabilization state.
fn scan_existing_sets(dir: &Path, recursive: bool) -> Vec<ArchiveSetHandle> {
    let mut handles = std::collections::HashSet::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(read_dir) = fs::read_dir(&current) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
                continue;
            }
            if let Some(handle) = handle_for_member(&path) {
                handles.insert(handle);
            }
        }
    }
    handles.into_iter().map(ArchiveSetHandle::new).collect()
}

fn start_watcher(
    source_idx: usize,
    dir: &Path,
    recursive: bool,
    touch_tx: mpsc::UnboundedSender<(usize, PathBuf)>,
) -> Result<LiveWatcher> {
    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    if is_network_filesystem(dir) {
        warn!(dir = %dir.display(), "using polling watcher due to network filesystem");
        let mut watcher = PollWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                handle_notify_result(source_idx, res, &touch_tx)
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(10)),
        )
        .map_err(|e| RarvaultError::Internal(format!("poll watcher init failed: {e}")))?;
        watcher
            .watch(dir, mode)
            .map_err(|e| RarvaultError::Internal(format!("poll watch failed: {e}")))?;
        return Ok(LiveWatcher::Poll(watcher));
    }

    let mut debouncer = new_debouncer(
        Duration::from_millis(500),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for de in events {
                    #[allow(deprecated)]
                    let event = de.event.clone();
                    handle_notify_result(source_idx, Ok(event), &touch_tx);
                }
            }
            Err(errors) => {
                for e in errors {
                    error!("debouncer error: {e}");
                }
            }
        },
    )
    .map_err(|e| RarvaultError::Internal(format!("debouncer init failed: {e}")))?;
    debouncer
        .watch(dir, mode)
        .map_err(|e| RarvaultError::Internal(format!("watch failed: {e}")))?;
    Ok(LiveWatcher::Debounced(debouncer))
}

fn handle_notify_result(
    source_idx: usize,
    res: std::result::Result<Event, notify::Error>,
    touch_tx: &mpsc::UnboundedSender<(usize, PathBuf)>,
) {
    match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
                return;
            }
            for path in event.paths {
                let _ = touch_tx.send((source_idx, path));
            }
        }
        Err(e) => error!("watch error: {e:?}"),
    }
}

/// Determine if a path resides on a network filesystem (Linux only; other
/// platforms always watch locally).
fn is_network_filesystem(path: &Path) -> bool {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let Ok(file) = fs::File::open("/proc/mounts") else {
        return false;
    };
    let reader = BufReader::new(file);

    let mut best: Option<(PathBuf, String)> = None;
    for line in reader.lines().map_while(std::result::Result::ok) {
        let mut parts = line.split_whitespace();
        let _src = parts.next();
        let Some(mountpoint) = parts.next() else { continue };
        let Some(fstype) = parts.next() else { continue };
        let mnt_path = PathBuf::from(mountpoint);
        if canonical.starts_with(&mnt_path) {
            let take = match &best {
                None => true,
                Some((prev, _)) => mnt_path.as_os_str().len() > prev.as_os_str().len(),
            };
            if take {
                best = Some((mnt_path, fstype.to_string()));
            }
        }
    }

    const NETWORK_FS: &[&str] = &["nfs", "nfs4", "cifs", "smbfs", "smb3", "afs", "sshfs", "fuse.sshfs"];
    best.is_some_and(|(_, fstype)| NETWORK_FS.contains(&fstype.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn scan_existing_sets_dedupes_multi_volume_archives() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            File::create(dir.path().join(format!("X.part{n:02}.rar"))).unwrap();
        }
        File::create(dir.path().join("Y.rar")).unwrap();

        let handles = scan_existing_sets(dir.path(), false);
        assert_eq!(handles.len(), 2);
    }

    #[test]
    fn scan_existing_sets_ignores_non_archive_files() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("readme.txt")).unwrap();
        let handles = scan_existing_sets(dir.path(), false);
        assert!(handles.is_empty());
    }
}
