//! Library Notifier (spec.md §4.9, §6.4).
//!
//! A single best-effort HTTP call asking the media server to rescan a
//! library section. Mirrors the teacher's own posture toward its external
//! TMDB/metadata calls: failures are logged and swallowed, never propagated
//! to the caller, since the archive has already been materialized.

use std::time::Duration;

use tracing::warn;

use crate::config::NotifierConfig;

pub struct LibraryNotifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl LibraryNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    /// Issue the refresh call. Never returns an error to the caller; every
    /// failure mode is logged and absorbed (spec.md §7 "Library refresh
    /// failure").
    pub async fn notify(&self, library_key: &str) {
        let path = self
            .config
            .refresh_path_template
            .replace("{library_key}", library_key);
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let request = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.config.token)
            .timeout(Duration::from_secs(self.config.timeout.as_secs().max(1)));

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(url, status = %resp.status(), "library refresh acknowledged");
            }
            Ok(resp) => {
                warn!(url, status = %resp.status(), "library refresh returned non-2xx");
            }
            Err(e) => {
                warn!(url, error = %e, "library refresh call failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_path_template_substitutes_library_key() {
        let config = NotifierConfig {
            base_url: "http://localhost:32400".into(),
            token: "secret".into(),
            library_key: "5".into(),
            refresh_path_template: "/library/sections/{library_key}/refresh".into(),
            timeout: Duration::from_secs(5),
        };
        let path = config.refresh_path_template.replace("{library_key}", "5");
        assert_eq!(path, "/library/sections/5/refresh");
    }
}
