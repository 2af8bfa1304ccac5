use std::path::PathBuf;

/// Failure modes for the archive reader (spec.md §4.1).
///
/// All are non-fatal to the service; they drive per-item disposition in the
/// processing queue rather than aborting the process.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive is missing volume {0}")]
    MissingVolume(PathBuf),

    #[error("archive is corrupt: {0}")]
    Corrupt(String),

    #[error("archive is encrypted")]
    Encrypted,

    #[error("archive operation timed out")]
    Timeout,

    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for rarvault-core.
#[derive(Debug, thiserror::Error)]
pub enum RarvaultError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate index error: {0}")]
    DupeIndex(String),

    #[error("port unavailable in configured range")]
    PortUnavailable,

    #[error("external mount failed: {0}")]
    ExternalMount(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RarvaultError>;
