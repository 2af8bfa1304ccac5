//! Materialization strategies (spec.md §4.5–§4.8).
//!
//! "Strategy as a capability, not a class hierarchy" (spec.md §9): a tagged
//! enum per configured source rather than a trait object, the same way the
//! teacher picks a concrete thumbnail backend by config rather than
//! dispatching through a generic transcoder trait.

pub mod extract;
pub mod external_mount;
pub mod virtual_http;

use std::path::{Path, PathBuf};

use crate::archive::ArchiveSession;
use crate::error::Result;
use crate::types::{ArchiveEntry, ArchiveSetHandle};

/// What one strategy invocation produced for a single entry.
#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    Created(PathBuf),
    SkippedDuplicate,
}

/// The contract every strategy implements for one surviving entry (spec.md
/// §4.5 "Every strategy receives `(session, entry, target_directory,
/// library_id)`").
pub struct MaterializeRequest<'a> {
    pub handle: &'a ArchiveSetHandle,
    pub session: &'a dyn ArchiveSession,
    pub entry: &'a ArchiveEntry,
    pub target_directory: &'a Path,
    pub library_id: &'a str,
}

pub enum MaterializationStrategy {
    Extract(extract::ExtractStrategy),
    VirtualHttp(virtual_http::VirtualHttpStrategy),
    ExternalMount(external_mount::ExternalMountStrategy),
}

impl MaterializationStrategy {
    pub async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializeOutcome> {
        match self {
            Self::Extract(s) => s.materialize(req).await,
            Self::VirtualHttp(s) => s.materialize(req).await,
            Self::ExternalMount(s) => s.materialize(req).await,
        }
    }
}
