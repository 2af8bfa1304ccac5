//! Duplicate Index (spec.md §4.2).
//!
//! Persists a mapping from content fingerprint to the path where a
//! previously materialized file was placed. Grounded on the teacher's
//! content-addressed blob store (`ferrex-core::infra::cache`), which already
//! uses `cacache` for durable-before-return writes and safe concurrent
//! readers; we reuse the same crate rather than hand-rolling a key/value file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RarvaultError, Result};
use crate::types::Fingerprint;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DupeRow {
    path: PathBuf,
    first_seen_at: DateTime<Utc>,
}

/// Persistent fingerprint → path index, backed by a `cacache` store rooted
/// at `data/duplicates.db` (spec.md §6.1).
#[derive(Clone)]
pub struct DuplicateIndex {
    root: PathBuf,
}

impl DuplicateIndex {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key(fingerprint: &Fingerprint) -> String {
        format!("rarvault:dupe:{}", fingerprint.to_hex())
    }

    /// Returns the previously materialized path for `fingerprint`, if any.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<PathBuf>> {
        let key = Self::key(fingerprint);
        match cacache::metadata(&self.root, &key).await {
            Ok(Some(meta)) => {
                let row: DupeRow = serde_json::from_value(meta.metadata)
                    .map_err(|e| RarvaultError::DupeIndex(e.to_string()))?;
                Ok(Some(row.path))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RarvaultError::DupeIndex(e.to_string())),
        }
    }

    /// Insert a new row. Never updates an existing fingerprint — first
    /// writer wins, matching "Unique on fingerprint. Never updated; only
    /// inserted or read" (spec.md §3).
    pub async fn insert(
        &self,
        fingerprint: &Fingerprint,
        path: &Path,
        at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        if self.lookup(fingerprint).await?.is_some() {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let key = Self::key(fingerprint);
        let row = DupeRow {
            path: path.to_path_buf(),
            first_seen_at: at,
        };
        let metadata =
            serde_json::to_value(&row).map_err(|e| RarvaultError::DupeIndex(e.to_string()))?;

        let mut writer = cacache::WriteOpts::new()
            .metadata(metadata)
            .open(&self.root, &key)
            .await
            .map_err(|e| RarvaultError::DupeIndex(e.to_string()))?;
        use tokio::io::AsyncWriteExt;
        writer
            .write_all(fingerprint.as_bytes())
            .await
            .map_err(|e| RarvaultError::DupeIndex(e.to_string()))?;
        writer
            .commit()
            .await
            .map_err(|e| RarvaultError::DupeIndex(e.to_string()))?;

        Ok(InsertOutcome::Inserted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = DuplicateIndex::new(dir.path().to_path_buf());
        let fp = Fingerprint::new([7u8; 32]);
        let path = PathBuf::from("/library/Movie (2021).mkv");

        let outcome = index.insert(&fp, &path, Utc::now()).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let found = index.lookup(&fp).await.unwrap();
        assert_eq!(found, Some(path));
    }

    #[tokio::test]
    async fn inserting_same_fingerprint_twice_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let index = DuplicateIndex::new(dir.path().to_path_buf());
        let fp = Fingerprint::new([9u8; 32]);

        index
            .insert(&fp, Path::new("/a.mkv"), Utc::now())
            .await
            .unwrap();
        let second = index
            .insert(&fp, Path::new("/b.mkv"), Utc::now())
            .await
            .unwrap();

        assert_eq!(second, InsertOutcome::AlreadyPresent);
        // First writer wins: the path stays /a.mkv, never updated to /b.mkv.
        assert_eq!(index.lookup(&fp).await.unwrap(), Some(PathBuf::from("/a.mkv")));
    }

    #[tokio::test]
    async fn lookup_of_unknown_fingerprint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let index = DuplicateIndex::new(dir.path().to_path_buf());
        let fp = Fingerprint::new([1u8; 32]);
        assert_eq!(index.lookup(&fp).await.unwrap(), None);
    }
}
