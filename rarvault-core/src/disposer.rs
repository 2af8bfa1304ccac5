//! Archive Disposer (spec.md §4.10).
//!
//! Given the first volume path and its siblings, either deletes the whole
//! set or relocates it into the configured archive directory, preserving
//! any subtree prefix below the source root.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, info};

use crate::config::DisposalPolicy;
use crate::error::Result;
use crate::fsutil::rename_or_copy;

pub struct ArchiveDisposer {
    pub policy: DisposalPolicy,
    pub archive_dir: PathBuf,
}

impl ArchiveDisposer {
    pub fn new(policy: DisposalPolicy, archive_dir: PathBuf) -> Self {
        Self { policy, archive_dir }
    }

    /// Dispose of every volume in `volumes`, all of which live under `source_root`.
    pub async fn dispose(&self, source_root: &Path, volumes: &[PathBuf]) -> Result<()> {
        match self.policy {
            DisposalPolicy::Delete => {
                for volume in volumes {
                    if let Err(e) = fs::remove_file(volume).await {
                        error!(path = %volume.display(), error = %e, "failed to delete archive volume");
                    }
                }
                info!(count = volumes.len(), "deleted archive volumes on success");
            }
            DisposalPolicy::MoveTo => {
                for volume in volumes {
                    let relative = volume.strip_prefix(source_root).unwrap_or(volume);
                    let destination = self.archive_dir.join(relative);
                    if let Some(parent) = destination.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    // Disposer failure policy (spec.md §7): fall back to
                    // copy-then-delete; if that also fails, leave the source
                    // in place, log, and do not re-queue.
                    if let Err(e) = rename_or_copy(volume, &destination).await {
                        error!(
                            path = %volume.display(),
                            destination = %destination.display(),
                            error = %e,
                            "failed to relocate archive volume; leaving source in place"
                        );
                    }
                }
                info!(count = volumes.len(), dir = %self.archive_dir.display(), "relocated archive volumes on success");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    #[tokio::test]
    async fn delete_policy_removes_every_volume() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("X.rar");
        let b = dir.path().join("X.r00");
        stdfs::write(&a, b"a").unwrap();
        stdfs::write(&b, b"b").unwrap();

        let disposer = ArchiveDisposer::new(DisposalPolicy::Delete, dir.path().join("archive"));
        disposer.dispose(dir.path(), &[a.clone(), b.clone()]).await.unwrap();

        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn move_policy_preserves_subtree_prefix() {
        let root = tempfile::tempdir().unwrap();
        let archive_root = tempfile::tempdir().unwrap();
        let sub = root.path().join("TV/Show/S01");
        stdfs::create_dir_all(&sub).unwrap();
        let volume = sub.join("X.rar");
        stdfs::write(&volume, b"content").unwrap();

        let disposer = ArchiveDisposer::new(DisposalPolicy::MoveTo, archive_root.path().to_path_buf());
        disposer.dispose(root.path(), &[volume.clone()]).await.unwrap();

        assert!(!volume.exists());
        assert!(archive_root.path().join("TV/Show/S01/X.rar").exists());
    }
}
