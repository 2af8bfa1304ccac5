//! Validated, in-memory configuration shared by every core component.
//!
//! `rarvault-server::config` owns the TOML-facing document (spec.md §6.5) and
//! converts it into these types; `rarvault-core` itself never parses config
//! files, it only consumes validated values.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::ProcessingMode;

/// One `directory_pairs` entry (spec.md §6.5).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub label: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub library_id: String,
    pub strategy: ProcessingMode,
    pub enabled: bool,
    pub recursive: bool,
}

/// Retry policy for the processing queue (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub retry_interval: Duration,
    pub max_retry_age_hours: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            retry_interval: Duration::from_secs(60),
            max_retry_age_hours: 24,
        }
    }
}

/// Directory-watch stabilization parameters (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct StabilizationConfig {
    pub poll_interval: Duration,
    pub file_stabilization_time: Duration,
    pub max_file_age: Duration,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            file_stabilization_time: Duration::from_secs(10),
            max_file_age: Duration::from_secs(3600),
        }
    }
}

/// Size and filter bounds for candidate media entries (spec.md §4.1 "Policy").
#[derive(Debug, Clone)]
pub struct MediaFilterConfig {
    pub min_size_bytes: u64,
    pub max_size_bytes: u64,
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    pub subtitle_extensions: Vec<String>,
    pub skip_name_fragments: Vec<String>,
}

impl Default for MediaFilterConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024 * 1024,              // 1 MiB
            max_size_bytes: 100 * 1024 * 1024 * 1024, // 100 GiB
            video_extensions: [
                "mkv", "mp4", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpg", "mpeg", "3gp",
                "ogv", "ts", "mts", "m2ts",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            audio_extensions: ["mp3", "flac", "aac", "ogg", "wav", "m4a"]
                .into_iter()
                .map(String::from)
                .collect(),
            subtitle_extensions: ["srt", "sub", "idx", "ass", "ssa"]
                .into_iter()
                .map(String::from)
                .collect(),
            skip_name_fragments: vec!["sample".to_string()],
        }
    }
}

impl MediaFilterConfig {
    /// True if the entry path looks like a candidate media file and falls
    /// within the configured size bounds. Directory entries must be filtered
    /// out by the caller before this check.
    pub fn is_candidate(&self, path: &str, size: u64) -> bool {
        let lower = path.to_ascii_lowercase();
        if self
            .skip_name_fragments
            .iter()
            .any(|frag| lower.contains(frag))
        {
            return false;
        }
        let ext = match lower.rsplit('.').next() {
            Some(e) if e != lower => e,
            _ => return false,
        };
        let recognized = self.video_extensions.iter().any(|e| e == ext)
            || self.audio_extensions.iter().any(|e| e == ext)
            || self.subtitle_extensions.iter().any(|e| e == ext);
        if !recognized {
            return false;
        }
        size >= self.min_size_bytes && size <= self.max_size_bytes
    }
}

/// Port range and streaming limits for the virtual-HTTP strategy (spec.md §6.5).
#[derive(Debug, Clone, Copy)]
pub struct VirtualHttpConfig {
    pub port_range: (u16, u16),
    pub max_concurrent_streams: usize,
    pub stream_chunk_size: usize,
    pub bind_any: bool,
}

impl Default for VirtualHttpConfig {
    fn default() -> Self {
        Self {
            port_range: (8765, 8865),
            max_concurrent_streams: 10,
            stream_chunk_size: 8 * 1024,
            bind_any: false,
        }
    }
}

/// External-mount helper invocation parameters (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct ExternalMountConfig {
    pub executable: PathBuf,
    pub mount_base: PathBuf,
    pub mount_options: Vec<String>,
    pub unmount_timeout: Duration,
    pub mount_ready_timeout: Duration,
}

/// Media-server refresh call parameters (spec.md §4.9, §6.5 `plex`).
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub base_url: String,
    pub token: String,
    pub library_key: String,
    pub refresh_path_template: String,
    pub timeout: Duration,
}

/// Archive disposer behavior (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalPolicy {
    Delete,
    MoveTo,
}

/// Top-level validated configuration consumed by core components.
#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub work_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub disposal_policy: DisposalPolicy,
    pub duplicate_check: bool,
    pub scan_existing_files: bool,
    pub retry_policy: RetryPolicy,
    pub stabilization: StabilizationConfig,
    pub media_filter: MediaFilterConfig,
    pub virtual_http: VirtualHttpConfig,
    pub external_mount: ExternalMountConfig,
    pub notifier: Option<NotifierConfig>,
    pub archive_test_timeout: Duration,
}
