//! End-to-end coverage for Strategy A (spec.md §4.6) against an in-memory
//! fake archive session, exercising P6 (hash round-trip) and the collision
//! policy without needing a real RAR file on disk.

use std::path::PathBuf;

use async_trait::async_trait;

use rarvault_core::archive::{ArchiveSession, EntryReader, TestOutcome};
use rarvault_core::dupe_index::DuplicateIndex;
use rarvault_core::error::Result;
use rarvault_core::strategy::extract::ExtractStrategy;
use rarvault_core::strategy::{MaterializeOutcome, MaterializeRequest};
use rarvault_core::types::{ArchiveEntry, ArchiveSetHandle};

struct FakeReader {
    content: Vec<u8>,
}

#[async_trait]
impl EntryReader for FakeReader {
    async fn read_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        if start >= self.content.len() {
            return Ok(Vec::new());
        }
        let end = std::cmp::min(start + length, self.content.len());
        Ok(self.content[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.content.len() as u64
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FakeSession {
    content: Vec<u8>,
}

#[async_trait]
impl ArchiveSession for FakeSession {
    async fn is_encrypted(&self) -> Result<bool> {
        Ok(false)
    }

    async fn test(&self, _timeout: std::time::Duration) -> Result<TestOutcome> {
        Ok(TestOutcome::Ok)
    }

    async fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(vec![ArchiveEntry {
            path: "Movie.Title.2021.1080p.x264-GROUP.mkv".to_string(),
            size: self.content.len() as u64,
            crc32: None,
            encrypted: false,
            mtime: None,
        }])
    }

    async fn open_entry(&self, _entry: &ArchiveEntry) -> Result<Box<dyn EntryReader>> {
        Ok(Box::new(FakeReader {
            content: self.content.clone(),
        }))
    }
}

fn entry(size: u64) -> ArchiveEntry {
    ArchiveEntry {
        path: "Movie.Title.2021.1080p.x264-GROUP.mkv".to_string(),
        size,
        crc32: None,
        encrypted: false,
        mtime: None,
    }
}

#[tokio::test]
async fn duplicate_content_under_a_different_name_materializes_once() {
    let work_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let dupe_root = tempfile::tempdir().unwrap();

    let strategy = ExtractStrategy {
        work_dir: work_dir.path().to_path_buf(),
        duplicate_check: true,
        dupe_index: DuplicateIndex::new(dupe_root.path().to_path_buf()),
    };

    let content = b"identical media bytes, repeated".repeat(1000);

    let first_session = FakeSession { content: content.clone() };
    let first_entry = entry(content.len() as u64);
    let first_handle = ArchiveSetHandle::new(PathBuf::from("/watch/Movie.Title.2021.1080p.x264-GROUP.rar"));
    let outcome = strategy
        .materialize(MaterializeRequest {
            handle: &first_handle,
            session: &first_session,
            entry: &first_entry,
            target_directory: target_dir.path(),
            library_id: "1",
        })
        .await
        .unwrap();
    let first_path = match outcome {
        MaterializeOutcome::Created(path) => path,
        MaterializeOutcome::SkippedDuplicate => panic!("first insert should materialize"),
    };
    assert!(first_path.exists());

    // A differently-named archive set whose inner media file has identical
    // bytes (spec.md §8 scenario 5).
    let second_session = FakeSession { content: content.clone() };
    let mut second_entry = entry(content.len() as u64);
    second_entry.path = "Other.Release.2021.WEB-DL.mkv".to_string();
    let second_handle = ArchiveSetHandle::new(PathBuf::from("/watch/Other.Release.2021.WEB-DL.rar"));
    let outcome = strategy
        .materialize(MaterializeRequest {
            handle: &second_handle,
            session: &second_session,
            entry: &second_entry,
            target_directory: target_dir.path(),
            library_id: "1",
        })
        .await
        .unwrap();
    assert!(matches!(outcome, MaterializeOutcome::SkippedDuplicate));

    let files: Vec<_> = std::fs::read_dir(target_dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1, "exactly one materialized file on disk (P6)");
}

#[tokio::test]
async fn collision_on_sanitized_name_never_overwrites() {
    let work_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let dupe_root = tempfile::tempdir().unwrap();

    let strategy = ExtractStrategy {
        work_dir: work_dir.path().to_path_buf(),
        duplicate_check: false,
        dupe_index: DuplicateIndex::new(dupe_root.path().to_path_buf()),
    };

    for bytes in [b"first cut".to_vec(), b"second cut, different length".to_vec()] {
        let session = FakeSession { content: bytes.clone() };
        let archive_entry = entry(bytes.len() as u64);
        let handle = ArchiveSetHandle::new(PathBuf::from(format!(
            "/watch/Movie.Title.2021.1080p.x264-GROUP-{}.rar",
            bytes.len()
        )));
        strategy
            .materialize(MaterializeRequest {
                handle: &handle,
                session: &session,
                entry: &archive_entry,
                target_directory: target_dir.path(),
                library_id: "1",
            })
            .await
            .unwrap();
    }

    let files: Vec<_> = std::fs::read_dir(target_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files.contains(&"Movie Title (2021).mkv".to_string()));
    assert!(files.contains(&"Movie Title (2021) (2).mkv".to_string()));
}
