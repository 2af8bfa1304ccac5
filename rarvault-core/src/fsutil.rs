//! Shared filesystem primitives: atomic placement and cross-device moves
//! (spec.md §4.5 "Atomicity", §9 "Atomic rename across volumes").

use std::path::Path;

use tokio::fs;

use crate::error::Result;

/// Rename `from` to `to`, falling back to copy-then-delete when they live on
/// different filesystems (`EXDEV`). Never leaves a partial file visible at
/// `to`: the copy lands at a sibling temp path first, then is renamed.
pub async fn rename_or_copy(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            let staging = sibling_temp_path(to);
            fs::copy(from, &staging).await?;
            fs::rename(&staging, to).await?;
            fs::remove_file(from).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn sibling_temp_path(target: &Path) -> std::path::PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{file_name}.rarvault-tmp"))
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux; stable across the platforms this service targets.
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    i32::MIN
}

/// Recursively empty (but keep) a directory. Used to clean `work/` at
/// startup and after each archive set.
pub async fn clear_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).await?;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rename_within_same_volume_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("src.bin");
        let to = dir.path().join("dst.bin");
        fs::write(&from, b"payload").await.unwrap();

        rename_or_copy(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn clear_dir_removes_files_and_subdirs_but_keeps_the_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.tmp"), b"x").await.unwrap();
        fs::create_dir(dir.path().join("sub")).await.unwrap();
        fs::write(dir.path().join("sub/b.tmp"), b"y").await.unwrap();

        clear_dir(dir.path()).await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert!(dir.path().exists());
    }
}
