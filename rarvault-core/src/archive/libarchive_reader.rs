//! `libarchive2`-backed implementation of [`super::ArchiveReader`].
//!
//! `libarchive2::ReadArchive` is blocking FFI, so every operation here runs
//! on `spawn_blocking` — the same shape the teacher uses to keep
//! `ffmpeg-next` probes off the async executor. `LibarchiveEntryReader`
//! methods all take `&mut self`, so the decode cursor needs no locking of
//! its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use libarchive2::entry::FileType;
use libarchive2::ReadArchive;
use tracing::{debug, warn};

use crate::error::{ArchiveError, RarvaultError, Result};
use crate::types::ArchiveEntry;

use super::{resolve_and_validate, ArchiveReader, ArchiveSession, EntryReader, TestOutcome};

#[derive(Default)]
pub struct LibarchiveReader;

#[async_trait]
impl ArchiveReader for LibarchiveReader {
    async fn open(&self, first_volume_path: &Path) -> Result<Box<dyn ArchiveSession>> {
        let volumes = resolve_and_validate(first_volume_path)?;
        Ok(Box::new(LibarchiveSession { volumes }))
    }
}

struct LibarchiveSession {
    volumes: Vec<PathBuf>,
}

/// Open a fresh multi-volume reader over `volumes`, supporting every format
/// and filter libarchive knows (RAR4/RAR5 among them).
fn open_reader(volumes: &[PathBuf]) -> Result<ReadArchive<'static>> {
    ReadArchive::open_filenames(volumes).map_err(|e| {
        RarvaultError::Archive(ArchiveError::Corrupt(format!(
            "failed to open archive set: {e}"
        )))
    })
}

fn entry_to_descriptor(entry: &libarchive2::entry::Entry<'_>) -> Option<ArchiveEntry> {
    if entry.file_type() != FileType::RegularFile {
        return None;
    }
    let path = entry.pathname()?;
    let size = entry.size().max(0) as u64;
    let mtime = entry.mtime().map(chrono::DateTime::<chrono::Utc>::from);
    Some(ArchiveEntry {
        path,
        size,
        crc32: None,
        encrypted: entry.is_encrypted() || entry.is_data_encrypted(),
        mtime,
    })
}

#[async_trait]
impl ArchiveSession for LibarchiveSession {
    async fn is_encrypted(&self) -> Result<bool> {
        let volumes = self.volumes.clone();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut archive = open_reader(&volumes)?;
            loop {
                let entry = archive.next_entry().map_err(|e| {
                    RarvaultError::Archive(ArchiveError::Corrupt(e.to_string()))
                })?;
                let Some(entry) = entry else { return Ok(false) };
                let encrypted = entry.is_encrypted() || entry.is_data_encrypted();
                if encrypted {
                    return Ok(true);
                }
                // We couldn't determine encryption without attempting a read;
                // per spec.md §4.1 policy, treat an unreadable entry as
                // encrypted rather than silently skipping it.
                archive.skip_data().map_err(|_| {
                    RarvaultError::Archive(ArchiveError::Encrypted)
                })?;
            }
        })
        .await
        .map_err(|e| RarvaultError::Internal(format!("join error: {e}")))?
    }

    async fn test(&self, timeout: Duration) -> Result<TestOutcome> {
        let volumes = self.volumes.clone();
        let work = tokio::task::spawn_blocking(move || -> Result<TestOutcome> {
            let mut archive = match open_reader(&volumes) {
                Ok(a) => a,
                Err(_) => return Ok(TestOutcome::Corrupt),
            };
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let entry = match archive.next_entry() {
                    Ok(Some(e)) => e,
                    Ok(None) => break,
                    Err(_) => return Ok(TestOutcome::Corrupt),
                };
                if entry.is_encrypted() || entry.is_data_encrypted() {
                    return Ok(TestOutcome::Encrypted);
                }
                if entry.file_type() != FileType::RegularFile {
                    continue;
                }
                loop {
                    match archive.read_data(&mut buf) {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(_) => return Ok(TestOutcome::Corrupt),
                    }
                }
            }
            Ok(TestOutcome::Ok)
        });

        match tokio::time::timeout(timeout, work).await {
            Ok(joined) => joined.map_err(|e| RarvaultError::Internal(format!("join error: {e}")))?,
            Err(_) => {
                warn!("archive integrity test timed out");
                Ok(TestOutcome::Corrupt)
            }
        }
    }

    async fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        let volumes = self.volumes.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ArchiveEntry>> {
            let mut archive = open_reader(&volumes)?;
            let mut out = Vec::new();
            while let Some(entry) = archive
                .next_entry()
                .map_err(|e| RarvaultError::Archive(ArchiveError::Corrupt(e.to_string())))?
            {
                if let Some(descriptor) = entry_to_descriptor(&entry) {
                    out.push(descriptor);
                }
            }
            debug!(count = out.len(), "enumerated archive entries");
            Ok(out)
        })
        .await
        .map_err(|e| RarvaultError::Internal(format!("join error: {e}")))?
    }

    async fn open_entry(&self, entry: &ArchiveEntry) -> Result<Box<dyn EntryReader>> {
        Ok(Box::new(LibarchiveEntryReader {
            volumes: self.volumes.clone(),
            entry_path: entry.path.clone(),
            size: entry.size,
            state: None,
        }))
    }
}

/// Random-access reader for one archive entry.
///
/// libarchive's decoder is forward-only; seeking backward means discarding
/// the open archive and restarting decode from the beginning (spec.md
/// §4.1's explicitly allowed strategy). `state` holds the currently
/// positioned archive plus how many bytes of the entry have been consumed.
struct LibarchiveEntryReader {
    volumes: Vec<PathBuf>,
    entry_path: String,
    size: u64,
    state: Option<(ReadArchive<'static>, u64)>,
}

impl LibarchiveEntryReader {
    fn seek_to_entry(volumes: &[PathBuf], entry_path: &str) -> Result<ReadArchive<'static>> {
        let mut archive = open_reader(volumes)?;
        loop {
            let entry = archive
                .next_entry()
                .map_err(|e| RarvaultError::Archive(ArchiveError::Corrupt(e.to_string())))?;
            let Some(entry) = entry else {
                return Err(RarvaultError::Archive(ArchiveError::Corrupt(format!(
                    "entry {entry_path} not found in archive"
                ))));
            };
            if entry.pathname().as_deref() == Some(entry_path) {
                return Ok(archive);
            }
            archive
                .skip_data()
                .map_err(|e| RarvaultError::Archive(ArchiveError::Corrupt(e.to_string())))?;
        }
    }
}

#[async_trait]
impl EntryReader for LibarchiveEntryReader {
    async fn read_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let volumes = self.volumes.clone();
        let entry_path = self.entry_path.clone();
        let size = self.size;
        let existing = self.state.take();

        let (mut archive, mut cursor) = if let Some((archive, cursor)) = existing {
            if cursor <= offset {
                (archive, cursor)
            } else {
                drop(archive);
                let reopened =
                    tokio::task::spawn_blocking(move || Self::seek_to_entry(&volumes, &entry_path))
                        .await
                        .map_err(|e| RarvaultError::Internal(format!("join error: {e}")))??;
                (reopened, 0)
            }
        } else {
            let reopened =
                tokio::task::spawn_blocking(move || Self::seek_to_entry(&volumes, &entry_path))
                    .await
                    .map_err(|e| RarvaultError::Internal(format!("join error: {e}")))??;
            (reopened, 0)
        };

        let clamped_len = length.min(size.saturating_sub(offset) as usize);
        let result = tokio::task::spawn_blocking(move || -> Result<(ReadArchive<'static>, u64, Vec<u8>)> {
            // Discard bytes between the cursor and the requested offset.
            let mut discard = vec![0u8; 64 * 1024];
            let mut remaining = offset - cursor;
            while remaining > 0 {
                let take = remaining.min(discard.len() as u64) as usize;
                let n = archive
                    .read_data(&mut discard[..take])
                    .map_err(|e| RarvaultError::Archive(ArchiveError::Corrupt(e.to_string())))?;
                if n == 0 {
                    break;
                }
                remaining -= n as u64;
                cursor += n as u64;
            }

            let mut out = vec![0u8; clamped_len];
            let mut filled = 0usize;
            while filled < out.len() {
                let n = archive
                    .read_data(&mut out[filled..])
                    .map_err(|e| RarvaultError::Archive(ArchiveError::Corrupt(e.to_string())))?;
                if n == 0 {
                    break;
                }
                filled += n;
                cursor += n as u64;
            }
            out.truncate(filled);
            Ok((archive, cursor, out))
        })
        .await
        .map_err(|e| RarvaultError::Internal(format!("join error: {e}")))??;

        let (archive, cursor, data) = result;
        self.state = Some((archive, cursor));
        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        self.state.take();
        Ok(())
    }
}
