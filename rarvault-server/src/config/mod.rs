//! TOML-facing configuration document (spec.md §6.5) and its conversion into
//! [`rarvault_core::config::Config`]. `rarvault-core` never parses TOML; this
//! module owns the document shape, defaults, and validation.

use std::path::PathBuf;
use std::time::Duration;

use rarvault_core::config::{
    Config, DisposalPolicy, ExternalMountConfig, MediaFilterConfig, NotifierConfig, RetryPolicy,
    SourceConfig, StabilizationConfig, VirtualHttpConfig,
};
use rarvault_core::error::{RarvaultError, Result};
use rarvault_core::types::ProcessingMode;
use serde::Deserialize;
use tracing::warn;

/// Raw `[paths]` section.
#[derive(Debug, Deserialize)]
struct RawPaths {
    #[serde(default)]
    watch: Option<PathBuf>,
    #[serde(default)]
    target: Option<PathBuf>,
    #[serde(default = "default_work_dir")]
    work: PathBuf,
    #[serde(default = "default_failed_dir")]
    failed: PathBuf,
    #[serde(default = "default_archive_dir")]
    archive: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}
fn default_failed_dir() -> PathBuf {
    PathBuf::from("failed")
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawProcessingMode {
    Extract,
    VirtualHttp,
    ExternalMount,
}

impl From<RawProcessingMode> for ProcessingMode {
    fn from(mode: RawProcessingMode) -> Self {
        match mode {
            RawProcessingMode::Extract => ProcessingMode::Extract,
            RawProcessingMode::VirtualHttp => ProcessingMode::VirtualHttp,
            RawProcessingMode::ExternalMount => ProcessingMode::ExternalMount,
        }
    }
}

/// Raw `[options]` section.
#[derive(Debug, Deserialize)]
struct RawOptions {
    #[serde(default)]
    processing_mode: Option<RawProcessingMode>,
    #[serde(default)]
    delete_archives: bool,
    #[serde(default)]
    duplicate_check: bool,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default = "default_stabilization_secs")]
    file_stabilization_time: u64,
    #[serde(default = "default_max_file_age_secs")]
    max_file_age: u64,
    #[serde(default = "default_max_retry_attempts")]
    max_retry_attempts: u32,
    #[serde(default = "default_retry_interval_secs")]
    retry_interval: u64,
    #[serde(default = "default_max_retry_age_hours")]
    max_retry_age_hours: u64,
    #[serde(default = "default_true")]
    scan_existing_files: bool,
    #[serde(default = "default_archive_test_timeout_secs")]
    archive_test_timeout: u64,
}

fn default_stabilization_secs() -> u64 {
    10
}
fn default_max_file_age_secs() -> u64 {
    3600
}
fn default_max_retry_attempts() -> u32 {
    5
}
fn default_retry_interval_secs() -> u64 {
    60
}
fn default_max_retry_age_hours() -> u64 {
    24
}
fn default_true() -> bool {
    true
}
fn default_archive_test_timeout_secs() -> u64 {
    120
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            processing_mode: None,
            delete_archives: false,
            duplicate_check: false,
            extensions: Vec::new(),
            file_stabilization_time: default_stabilization_secs(),
            max_file_age: default_max_file_age_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval: default_retry_interval_secs(),
            max_retry_age_hours: default_max_retry_age_hours(),
            scan_existing_files: true,
            archive_test_timeout: default_archive_test_timeout_secs(),
        }
    }
}

/// Raw `[virtual_http]` section.
#[derive(Debug, Deserialize)]
struct RawVirtualHttp {
    #[serde(default = "default_port_range")]
    port_range: (u16, u16),
    #[serde(default = "default_max_concurrent_streams")]
    max_concurrent_streams: usize,
    #[serde(default = "default_stream_chunk_size")]
    stream_chunk_size: usize,
    #[serde(default = "default_bind")]
    bind: String,
}

fn default_port_range() -> (u16, u16) {
    (8765, 8865)
}
fn default_max_concurrent_streams() -> usize {
    10
}
fn default_stream_chunk_size() -> usize {
    8 * 1024
}
fn default_bind() -> String {
    "loopback".to_string()
}

impl Default for RawVirtualHttp {
    fn default() -> Self {
        Self {
            port_range: default_port_range(),
            max_concurrent_streams: default_max_concurrent_streams(),
            stream_chunk_size: default_stream_chunk_size(),
            bind: default_bind(),
        }
    }
}

/// Raw `[external_mount]` section.
#[derive(Debug, Deserialize, Default)]
struct RawExternalMount {
    #[serde(default)]
    executable: Option<PathBuf>,
    #[serde(default)]
    mount_base: Option<PathBuf>,
    #[serde(default)]
    mount_options: Vec<String>,
    #[serde(default = "default_unmount_timeout_secs")]
    unmount_timeout: u64,
    #[serde(default = "default_mount_ready_timeout_secs")]
    mount_ready_timeout: u64,
}

fn default_unmount_timeout_secs() -> u64 {
    10
}
fn default_mount_ready_timeout_secs() -> u64 {
    30
}

/// Raw `[plex]` section (spec.md §4.9 media-server refresh).
#[derive(Debug, Deserialize)]
struct RawPlex {
    host: String,
    token: String,
    library_key: String,
    #[serde(default = "default_refresh_path_template")]
    refresh_path_template: String,
    #[serde(default = "default_notifier_timeout_secs")]
    timeout: u64,
}

fn default_refresh_path_template() -> String {
    "/library/sections/{library_key}/refresh".to_string()
}
fn default_notifier_timeout_secs() -> u64 {
    10
}

/// One `[[directory_pairs]]` entry.
#[derive(Debug, Deserialize)]
struct RawDirectoryPair {
    source: PathBuf,
    target: PathBuf,
    #[serde(default)]
    strategy: Option<RawProcessingMode>,
    library_id: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    label: Option<String>,
}

/// Raw `[logging]` section.
#[derive(Debug, Deserialize)]
struct RawLogging {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_max_log_size")]
    max_log_size: u64,
    #[serde(default = "default_backup_count")]
    backup_count: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_log_size() -> u64 {
    10 * 1024 * 1024
}
fn default_backup_count() -> u32 {
    5
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_size: default_max_log_size(),
            backup_count: default_backup_count(),
        }
    }
}

/// The full configuration document as it appears on disk. Unknown top-level
/// keys and unknown keys within a known section are accepted by serde's
/// default behavior (extra fields are simply absent from these structs);
/// [`RawConfig::load`] additionally warns about unrecognized top-level keys
/// by round-tripping through a generic [`toml::Table`] first (spec.md §6.5
/// "unrecognized keys are ignored with a warning").
#[derive(Debug, Deserialize)]
struct RawConfig {
    paths: RawPaths,
    #[serde(default)]
    options: RawOptions,
    #[serde(default)]
    virtual_http: RawVirtualHttp,
    #[serde(default)]
    external_mount: RawExternalMount,
    #[serde(default)]
    plex: Option<RawPlex>,
    #[serde(default)]
    directory_pairs: Vec<RawDirectoryPair>,
    #[serde(default)]
    logging: RawLogging,
}

const KNOWN_SECTIONS: &[&str] = &[
    "paths",
    "options",
    "virtual_http",
    "external_mount",
    "plex",
    "directory_pairs",
    "logging",
];

/// Parsed logging configuration, consumed directly by `main`'s
/// `tracing-appender` setup rather than by `rarvault-core`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub max_log_size: u64,
    pub backup_count: u32,
}

/// Load, validate, and convert `path` into a [`rarvault_core::config::Config`]
/// plus the server-only [`LoggingConfig`].
///
/// Missing required keys (`paths.watch`, `paths.target`, or a `plex` table
/// referenced by a notifier-using source) abort with
/// `RarvaultError::Config`, which `main` turns into exit code 2 (spec.md
/// §6.6).
pub fn load(path: &std::path::Path) -> Result<(Config, LoggingConfig)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RarvaultError::Config(format!("cannot read {}: {e}", path.display())))?;
    warn_on_unknown_sections(&text);

    let raw: RawConfig =
        toml::from_str(&text).map_err(|e| RarvaultError::Config(format!("{}: {e}", path.display())))?;

    into_config(raw)
}

fn warn_on_unknown_sections(text: &str) {
    let Ok(table) = text.parse::<toml::Table>() else {
        return;
    };
    for key in table.keys() {
        if !KNOWN_SECTIONS.contains(&key.as_str()) {
            warn!(section = %key, "unrecognized configuration section ignored");
        }
    }
}

fn into_config(raw: RawConfig) -> Result<(Config, LoggingConfig)> {
    let default_mode: ProcessingMode = raw
        .options
        .processing_mode
        .map(Into::into)
        .unwrap_or(ProcessingMode::Extract);

    let mut sources = Vec::new();
    if raw.directory_pairs.is_empty() {
        let watch = raw
            .paths
            .watch
            .clone()
            .ok_or_else(|| RarvaultError::Config("paths.watch is required when no directory_pairs are configured".into()))?;
        let target = raw
            .paths
            .target
            .clone()
            .ok_or_else(|| RarvaultError::Config("paths.target is required when no directory_pairs are configured".into()))?;
        sources.push(SourceConfig {
            label: "default".to_string(),
            source: watch,
            target,
            library_id: String::new(),
            strategy: default_mode,
            enabled: true,
            recursive: false,
        });
    } else {
        for (idx, pair) in raw.directory_pairs.into_iter().enumerate() {
            sources.push(SourceConfig {
                label: pair.label.unwrap_or_else(|| format!("pair-{idx}")),
                source: pair.source,
                target: pair.target,
                library_id: pair.library_id,
                strategy: pair.strategy.map(Into::into).unwrap_or(default_mode),
                enabled: pair.enabled,
                recursive: pair.recursive,
            });
        }
    }

    let needs_external_mount = sources.iter().any(|s| s.strategy == ProcessingMode::ExternalMount);
    let external_mount = ExternalMountConfig {
        executable: raw.external_mount.executable.unwrap_or_default(),
        mount_base: raw.external_mount.mount_base.unwrap_or_else(|| PathBuf::from("mounts")),
        mount_options: raw.external_mount.mount_options,
        unmount_timeout: Duration::from_secs(raw.external_mount.unmount_timeout),
        mount_ready_timeout: Duration::from_secs(raw.external_mount.mount_ready_timeout),
    };
    if needs_external_mount && external_mount.executable.as_os_str().is_empty() {
        return Err(RarvaultError::Config(
            "external_mount.executable is required by a configured source".into(),
        ));
    }

    let notifier = match raw.plex {
        Some(plex) => Some(NotifierConfig {
            base_url: plex.host,
            token: plex.token,
            library_key: plex.library_key,
            refresh_path_template: plex.refresh_path_template,
            timeout: Duration::from_secs(plex.timeout),
        }),
        None => None,
    };

    let disposal_policy = if raw.options.delete_archives {
        DisposalPolicy::Delete
    } else {
        DisposalPolicy::MoveTo
    };

    let mut media_filter = MediaFilterConfig::default();
    if !raw.options.extensions.is_empty() {
        // `extensions` recognizes additional archive-volume suffixes beyond
        // the built-in `.rar`/`.rNN`/`.partNN.rar` conventions; the naming
        // conventions themselves stay fixed (spec.md §3 "Archive set"), so
        // this list is accepted and logged but does not change volume
        // resolution.
        warn!(
            extensions = ?raw.options.extensions,
            "options.extensions recognized but volume-naming conventions are fixed"
        );
    }
    media_filter.skip_name_fragments.push("sample".to_string());
    media_filter.skip_name_fragments.dedup();

    let config = Config {
        sources,
        work_dir: raw.paths.work,
        failed_dir: raw.paths.failed,
        archive_dir: raw.paths.archive,
        disposal_policy,
        duplicate_check: raw.options.duplicate_check,
        scan_existing_files: raw.options.scan_existing_files,
        retry_policy: RetryPolicy {
            max_retry_attempts: raw.options.max_retry_attempts,
            retry_interval: Duration::from_secs(raw.options.retry_interval),
            max_retry_age_hours: raw.options.max_retry_age_hours,
        },
        stabilization: StabilizationConfig {
            poll_interval: Duration::from_secs(10),
            file_stabilization_time: Duration::from_secs(raw.options.file_stabilization_time),
            max_file_age: Duration::from_secs(raw.options.max_file_age),
        },
        media_filter,
        virtual_http: VirtualHttpConfig {
            port_range: raw.virtual_http.port_range,
            max_concurrent_streams: raw.virtual_http.max_concurrent_streams,
            stream_chunk_size: raw.virtual_http.stream_chunk_size,
            bind_any: raw.virtual_http.bind == "any",
        },
        external_mount,
        notifier,
        archive_test_timeout: Duration::from_secs(raw.options.archive_test_timeout),
    };

    let logging = LoggingConfig {
        level: raw.logging.level,
        max_log_size: raw.logging.max_log_size,
        backup_count: raw.logging.backup_count,
    };

    Ok((config, logging))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_fills_in_defaults() {
        let doc = r#"
            [paths]
            watch = "/data/watch"
            target = "/data/target"
        "#;
        let raw: RawConfig = toml::from_str(doc).unwrap();
        let (config, logging) = into_config(raw).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].strategy, ProcessingMode::Extract);
        assert_eq!(config.virtual_http.port_range, (8765, 8865));
        assert_eq!(logging.level, "info");
    }

    #[test]
    fn missing_watch_without_directory_pairs_is_a_config_error() {
        let doc = r#"
            [paths]
            target = "/data/target"
        "#;
        let raw: RawConfig = toml::from_str(doc).unwrap();
        assert!(into_config(raw).is_err());
    }

    #[test]
    fn directory_pairs_override_the_default_watch_target() {
        let doc = r#"
            [paths]

            [[directory_pairs]]
            source = "/a/src"
            target = "/a/dst"
            library_id = "1"
            strategy = "virtual_http"
        "#;
        let raw: RawConfig = toml::from_str(doc).unwrap();
        let (config, _logging) = into_config(raw).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].strategy, ProcessingMode::VirtualHttp);
    }

    #[test]
    fn external_mount_strategy_without_executable_is_a_config_error() {
        let doc = r#"
            [paths]

            [[directory_pairs]]
            source = "/a/src"
            target = "/a/dst"
            library_id = "1"
            strategy = "external_mount"
        "#;
        let raw: RawConfig = toml::from_str(doc).unwrap();
        assert!(into_config(raw).is_err());
    }
}
