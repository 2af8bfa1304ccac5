use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies an archive set by the canonical path of its first volume
/// (the `.rar` handle used for all reads, per spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveSetHandle(PathBuf);

impl ArchiveSetHandle {
    pub fn new(first_volume: PathBuf) -> Self {
        Self(first_volume)
    }

    pub fn first_volume(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ArchiveSetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Why a queue item was submitted (spec.md §3 "Queue item").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLabel {
    New,
    Existing,
    Retry,
    Manual,
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceLabel::New => "new",
            SourceLabel::Existing => "existing",
            SourceLabel::Retry => "retry",
            SourceLabel::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// One entry inside an archive, filtered to non-directory entries (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub crc32: Option<u32>,
    pub encrypted: bool,
    pub mtime: Option<DateTime<Utc>>,
}

/// The three interchangeable materialization strategies (spec.md §2 row 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Extract,
    VirtualHttp,
    ExternalMount,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingMode::Extract => "extract",
            ProcessingMode::VirtualHttp => "virtual_http",
            ProcessingMode::ExternalMount => "external_mount",
        };
        write!(f, "{s}")
    }
}

/// A 256-bit content hash of a materialized media file (spec.md §3 "Fingerprint").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 128-bit opaque token identifying a virtual-HTTP mount handle (spec.md §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; 16]);

impl Token {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate 128 bits of entropy, URL-safe encoded per spec.md §4.7 "Token lifecycle".
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_url_safe(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_url_safe(s: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url_safe())
    }
}
