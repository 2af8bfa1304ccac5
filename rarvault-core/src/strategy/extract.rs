//! Strategy A — extract to disk (spec.md §4.6).

use std::path::PathBuf;

use chrono::Utc;
use tokio::fs::File;
use tracing::debug;
use uuid::Uuid;

use crate::dupe_index::{DuplicateIndex, InsertOutcome};
use crate::error::Result;
use crate::fingerprint::HashingWriter;
use crate::fsutil::rename_or_copy;
use crate::sanitize::{resolve_collision, sanitize_name};

use super::{MaterializeOutcome, MaterializeRequest};

const READ_CHUNK: usize = 1024 * 1024;

pub struct ExtractStrategy {
    pub work_dir: PathBuf,
    pub duplicate_check: bool,
    pub dupe_index: DuplicateIndex,
}

impl ExtractStrategy {
    pub async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializeOutcome> {
        let temp_path = self.work_dir.join(format!("{}.tmp", Uuid::new_v4()));
        let mut reader = req.session.open_entry(req.entry).await?;

        let file = File::create(&temp_path).await?;
        let mut writer = HashingWriter::new(file);

        let mut offset = 0u64;
        loop {
            let chunk = reader.read_at(offset, READ_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len() as u64;
            writer.write_chunk(&chunk).await?;
            offset += len;
            if offset >= reader.size() {
                break;
            }
        }
        reader.close().await?;
        let fingerprint = writer.finish().await?;

        if self.duplicate_check {
            if let Some(existing) = self.dupe_index.lookup(&fingerprint).await? {
                if existing.exists() {
                    tokio::fs::remove_file(&temp_path).await?;
                    debug!(fingerprint = %fingerprint, existing = %existing.display(), "duplicate content, temp file discarded");
                    return Ok(MaterializeOutcome::SkippedDuplicate);
                }
            }
        }

        let base_name = req
            .entry
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&req.entry.path);
        let sanitized = sanitize_name(base_name, None);
        let target_path = resolve_collision(req.target_directory, &sanitized);

        rename_or_copy(&temp_path, &target_path).await?;

        if self.duplicate_check {
            let outcome = self
                .dupe_index
                .insert(&fingerprint, &target_path, Utc::now())
                .await?;
            debug_assert!(matches!(outcome, InsertOutcome::Inserted | InsertOutcome::AlreadyPresent));
        }

        debug!(target = %target_path.display(), "extracted entry to target");
        Ok(MaterializeOutcome::Created(target_path))
    }
}
