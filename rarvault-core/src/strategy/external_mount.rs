//! Strategy C — external mount (spec.md §4.8).
//!
//! An adapter to an out-of-process capability: an external helper mounts an
//! archive set as a virtual directory, and this strategy only creates
//! symlinks into it and tracks which mount points this process launched so
//! they can be released on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ExternalMountConfig;
use crate::error::{RarvaultError, Result};
use crate::sanitize::resolve_collision;
use crate::types::ArchiveSetHandle;

use super::{MaterializeOutcome, MaterializeRequest};

pub struct ExternalMountStrategy {
    pub config: ExternalMountConfig,
    active: Arc<Mutex<HashMap<ArchiveSetHandle, PathBuf>>>,
}

impl ExternalMountStrategy {
    pub fn new(config: ExternalMountConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializeOutcome> {
        let mount_point = self.ensure_mounted(req.handle).await?;
        let source = mount_point.join(&req.entry.path);
        let base_name = req
            .entry
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&req.entry.path);
        let link_path = resolve_collision(req.target_directory, base_name);

        #[cfg(unix)]
        tokio::fs::symlink(&source, &link_path).await?;
        #[cfg(not(unix))]
        tokio::fs::copy(&source, &link_path).await?;

        info!(link = %link_path.display(), target = %source.display(), "linked external-mount entry");
        Ok(MaterializeOutcome::Created(link_path))
    }

    async fn ensure_mounted(&self, handle: &ArchiveSetHandle) -> Result<PathBuf> {
        let mut active = self.active.lock().await;
        if let Some(existing) = active.get(handle) {
            return Ok(existing.clone());
        }

        let mount_point = self
            .config
            .mount_base
            .join(mount_slug(handle.first_volume()));
        tokio::fs::create_dir_all(&mount_point).await?;

        let mut cmd = Command::new(&self.config.executable);
        cmd.arg(handle.first_volume()).arg(&mount_point);
        for opt in &self.config.mount_options {
            cmd.arg(opt);
        }
        let status = cmd
            .status()
            .await
            .map_err(|e| RarvaultError::ExternalMount(format!("failed to launch mount helper: {e}")))?;
        if !status.success() {
            return Err(RarvaultError::ExternalMount(format!(
                "mount helper exited with {status}"
            )));
        }

        wait_until_ready(&mount_point, self.config.mount_ready_timeout).await?;
        active.insert(handle.clone(), mount_point.clone());
        Ok(mount_point)
    }

    /// Release every mount launched by this process (spec.md §9 "Signals and
    /// shutdown" / P9 "no external mounts launched by this process remain").
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        for (handle, mount_point) in active.drain() {
            let result = tokio::time::timeout(
                self.config.unmount_timeout,
                Command::new(&self.config.executable)
                    .arg("--unmount")
                    .arg(&mount_point)
                    .status(),
            )
            .await;
            match result {
                Ok(Ok(status)) if status.success() => {
                    info!(mount = %mount_point.display(), "released external mount");
                }
                Ok(Ok(status)) => {
                    warn!(mount = %mount_point.display(), %status, "unmount helper reported failure");
                }
                Ok(Err(e)) => {
                    warn!(mount = %mount_point.display(), error = %e, "failed to launch unmount helper");
                }
                Err(_) => {
                    warn!(handle = %handle, mount = %mount_point.display(), "unmount timed out");
                }
            }
        }
    }
}

fn mount_slug(first_volume: &std::path::Path) -> String {
    first_volume
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mount")
        .to_string()
}

async fn wait_until_ready(mount_point: &std::path::Path, timeout: std::time::Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(mut entries) = tokio::fs::read_dir(mount_point).await {
            if entries.next_entry().await.ok().flatten().is_some() {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RarvaultError::ExternalMount(format!(
                "mount point {} did not become ready in time",
                mount_point.display()
            )));
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
