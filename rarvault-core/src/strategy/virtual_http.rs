//! Strategy B — virtual HTTP (spec.md §4.7, the core of this specification).
//!
//! The materialization step itself is light: register the entry under a
//! fresh token and write a `.strm` pointer file pointing at the in-process
//! range server. The server side (token resolution, `Range` handling) lives
//! in `rarvault-server`, which holds the same [`TokenRegistry`].

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;
use crate::sanitize::{resolve_collision, sanitize_name};
use crate::token_registry::TokenRegistry;

use super::{MaterializeOutcome, MaterializeRequest};

pub struct VirtualHttpStrategy {
    pub registry: TokenRegistry,
    /// `http://host:port`, fixed once the range server has bound its port.
    pub base_url: String,
}

impl VirtualHttpStrategy {
    pub async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializeOutcome> {
        let token = self
            .registry
            .register(req.handle.clone(), req.entry.path.clone(), req.entry.size);

        let base_name = req
            .entry
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&req.entry.path);
        let display_name = sanitize_name(base_name, None);
        let pointer_name = sanitize_name(base_name, Some("strm"));
        let pointer_path = resolve_collision(req.target_directory, &pointer_name);

        let url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            token,
            urlencode(&display_name)
        );

        let temp_path = pointer_path.with_extension("strm.tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(format!("{url}\n").as_bytes()).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&temp_path, &pointer_path).await?;

        debug!(pointer = %pointer_path.display(), token = %token, "wrote virtual-http pointer file");
        Ok(MaterializeOutcome::Created(pointer_path))
    }
}

fn urlencode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
