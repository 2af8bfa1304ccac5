//! Streaming content fingerprinting (spec.md §3 "Fingerprint").
//!
//! Computed only after a file has been fully produced on local storage, the
//! same way the teacher hashes image blobs while writing them
//! (`ferrex-core::infra::cache::image_file_store`).

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::types::Fingerprint;

/// Wraps an `AsyncWrite` destination, feeding every written chunk through a
/// running SHA-256 digest so the fingerprint is ready the instant the file
/// finishes writing — no separate read-back pass over the file.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: tokio::io::AsyncWrite + Unpin> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.inner.write_all(chunk).await?;
        self.hasher.update(chunk);
        Ok(())
    }

    pub async fn finish(mut self) -> Result<Fingerprint> {
        self.inner.flush().await?;
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Ok(Fingerprint::new(bytes))
    }
}

/// Hash a file already on disk (used by tests and by callers that cannot
/// hash while writing).
pub async fn fingerprint_file(path: &std::path::Path) -> Result<Fingerprint> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Ok(Fingerprint::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_writer_matches_direct_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        let data = b"some media bytes, repeated".repeat(1000);

        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut writer = HashingWriter::new(file);
        for chunk in data.chunks(4096) {
            writer.write_chunk(chunk).await.unwrap();
        }
        let streamed = writer.finish().await.unwrap();

        let direct = fingerprint_file(&path).await.unwrap();
        assert_eq!(streamed, direct);
    }
}
