//! rarvault daemon entry point: configuration loading, logging setup, and
//! process wiring for the watcher, the processing queue, and (when any
//! source uses the virtual-HTTP strategy) the range server.

pub mod config;
pub mod errors;
pub mod range_server;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rarvault_core::archive::libarchive_reader::LibarchiveReader;
use rarvault_core::archive::ArchiveReader;
use rarvault_core::config::Config;
use rarvault_core::disposer::ArchiveDisposer;
use rarvault_core::dupe_index::DuplicateIndex;
use rarvault_core::notifier::LibraryNotifier;
use rarvault_core::queue::worker::WorkerContext;
use rarvault_core::queue::ProcessingQueue;
use rarvault_core::strategy::extract::ExtractStrategy;
use rarvault_core::strategy::external_mount::ExternalMountStrategy;
use rarvault_core::strategy::virtual_http::VirtualHttpStrategy;
use rarvault_core::strategy::MaterializationStrategy;
use rarvault_core::token_registry::TokenRegistry;
use rarvault_core::types::ProcessingMode;
use rarvault_core::watch::DirectoryWatcher;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to the in-flight worker item to finish once shutdown starts
/// (spec.md §5 "Cancellation").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "rarvaultd")]
#[command(about = "Watches directories for RAR archives and exposes their media contents to a library server")]
struct Args {
    /// Path to the configuration document.
    #[arg(short, long, env = "RARVAULT_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the `logging.level` configured in the document.
    #[arg(long, env = "RARVAULT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Install root the relative `paths.*` entries resolve against.
    #[arg(long, env = "RARVAULT_ROOT", default_value = ".")]
    root: PathBuf,
}

fn main() {
    let args = Args::parse();
    let code = run(args);
    std::process::exit(code);
}

fn run(args: Args) -> i32 {
    let (config, logging) = match config::load(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 2;
        }
    };

    let log_level = args.log_level.unwrap_or(logging.level.clone());
    let log_dir = args.root.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log directory {}: {e}", log_dir.display());
        return 2;
    }
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("rarvault")
        .filename_suffix("log")
        .max_log_files(logging.backup_count as usize + 1)
        .build(&log_dir)
        .unwrap_or_else(|e| {
            eprintln!("failed to open log sink: {e}");
            std::process::exit(2);
        });
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rarvault_server={log_level},rarvault_core={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!(config = %args.config.display(), "rarvault starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return 3;
        }
    };

    runtime.block_on(async_main(config, args.root))
}

async fn async_main(config: Config, root: PathBuf) -> i32 {
    if let Err(e) = prepare_directories(&config, &root).await {
        error!(error = %e, "failed to prepare on-disk layout");
        return 2;
    }

    let reader: Arc<dyn ArchiveReader> = Arc::new(LibarchiveReader);
    let dupe_index = DuplicateIndex::new(root.join("data").join("duplicates.db"));
    let registry = TokenRegistry::new();

    let uses_virtual_http = config.sources.iter().any(|s| s.strategy == ProcessingMode::VirtualHttp);
    let uses_external_mount = config.sources.iter().any(|s| s.strategy == ProcessingMode::ExternalMount);

    let shutdown = CancellationToken::new();

    let mut base_url = String::new();
    let mut range_server_handle = None;
    if uses_virtual_http {
        let bind_ip: IpAddr = if config.virtual_http.bind_any {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        let (listener, port) = match bind_in_range(bind_ip, config.virtual_http.port_range).await {
            Some(found) => found,
            None => {
                error!(
                    range = ?config.virtual_http.port_range,
                    "no free port available for the virtual-http range server"
                );
                return 3;
            }
        };
        info!(port, "range server bound");
        let advertise_host = if config.virtual_http.bind_any {
            local_ip_best_effort().unwrap_or(Ipv4Addr::LOCALHOST)
        } else {
            Ipv4Addr::LOCALHOST
        };
        base_url = format!("http://{advertise_host}:{port}");

        let state = range_server::RangeServerState {
            registry: registry.clone(),
            reader: reader.clone(),
            chunk_size: config.virtual_http.stream_chunk_size,
            streams: Arc::new(Semaphore::new(config.virtual_http.max_concurrent_streams)),
        };
        let app = range_server::router(state);
        let shutdown_signal = shutdown.clone();
        range_server_handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
                .await
            {
                error!(error = %e, "range server exited with an error");
            }
        }));
    }

    let mut strategies: HashMap<ProcessingMode, Arc<MaterializationStrategy>> = HashMap::new();
    strategies.insert(
        ProcessingMode::Extract,
        Arc::new(MaterializationStrategy::Extract(ExtractStrategy {
            work_dir: config.work_dir.clone(),
            duplicate_check: config.duplicate_check,
            dupe_index: dupe_index.clone(),
        })),
    );
    strategies.insert(
        ProcessingMode::VirtualHttp,
        Arc::new(MaterializationStrategy::VirtualHttp(VirtualHttpStrategy {
            registry: registry.clone(),
            base_url,
        })),
    );
    let external_mount_entry = Arc::new(MaterializationStrategy::ExternalMount(ExternalMountStrategy::new(
        config.external_mount.clone(),
    )));
    strategies.insert(ProcessingMode::ExternalMount, external_mount_entry.clone());

    let notifier = config.notifier.clone().map(|n| Arc::new(LibraryNotifier::new(n)));
    let disposer = Arc::new(ArchiveDisposer::new(config.disposal_policy, config.archive_dir.clone()));

    let worker_ctx = Arc::new(WorkerContext {
        reader: reader.clone(),
        strategies,
        notifier,
        disposer,
        media_filter: config.media_filter.clone(),
        retry_policy: config.retry_policy,
        archive_test_timeout: config.archive_test_timeout,
        failed_dir: config.failed_dir.clone(),
    });

    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let watcher = DirectoryWatcher::new(config.sources.clone(), config.stabilization);
    let watcher_shutdown = shutdown.clone();
    let scan_existing = config.scan_existing_files;
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(tx, scan_existing, watcher_shutdown).await {
            error!(error = %e, "directory watcher exited with an error");
        }
    });

    let queue_shutdown = shutdown.clone();
    let queue_handle = tokio::spawn(rarvault_core::queue::run(
        ProcessingQueue::new(),
        rx,
        worker_ctx,
        queue_shutdown,
        SHUTDOWN_GRACE,
    ));

    wait_for_shutdown_signal().await;
    info!("shutdown requested, stopping watchers first");
    shutdown.cancel();

    let _ = watcher_handle.await;
    info!("draining processing queue under grace budget");
    let _ = queue_handle.await;

    if uses_external_mount {
        if let MaterializationStrategy::ExternalMount(strategy) = external_mount_entry.as_ref() {
            strategy.shutdown().await;
        }
    }
    registry.clear();

    if let Some(handle) = range_server_handle {
        info!("stopping range server last");
        let _ = handle.await;
    }

    info!("rarvault stopped cleanly");
    0
}

async fn prepare_directories(config: &Config, root: &PathBuf) -> std::io::Result<()> {
    tokio::fs::create_dir_all(root.join("data")).await?;
    tokio::fs::create_dir_all(&config.work_dir).await?;
    tokio::fs::create_dir_all(&config.failed_dir).await?;
    tokio::fs::create_dir_all(&config.archive_dir).await?;
    rarvault_core::fsutil::clear_dir(&config.work_dir)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}

/// Try each port in `[lo, hi]` in order, returning the first one that binds.
async fn bind_in_range(ip: IpAddr, range: (u16, u16)) -> Option<(tokio::net::TcpListener, u16)> {
    let (lo, hi) = range;
    for port in lo..=hi {
        let addr = SocketAddr::new(ip, port);
        if let Ok(listener) = tokio::net::TcpListener::bind(addr).await {
            return Some((listener, port));
        }
    }
    None
}

/// Best-effort discovery of a non-loopback local address to advertise in
/// pointer files when bound to `0.0.0.0`. Falls back to loopback if nothing
/// else can be determined; the operator is expected to prefer
/// `bind = "loopback"` unless the media server runs on another host.
fn local_ip_best_effort() -> Option<Ipv4Addr> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    }
}

/// Waits for SIGINT/SIGTERM (or Ctrl+C on platforms without Unix signals).
/// A signal here starts the graceful drain in `async_main`, which always
/// completes with exit code 0 (spec.md §6.6 "Clean shutdown"); code 130 is
/// reserved for a forced/impatient stop, which this daemon doesn't have yet.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, falling back to Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
