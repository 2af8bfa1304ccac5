//! Name sanitization and collision policy (spec.md §4.5).
//!
//! Generalizes the teacher's release-name cleanup
//! (`ferrex-core::orchestration::series::naming`) to the full token blocklist
//! and year-extraction rule the materialization strategies share.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::LazyLock;

const BLOCKED_TOKENS: &[&str] = &[
    "720p", "1080p", "2160p", "4k", "bluray", "web-dl", "webrip", "x264", "x265", "h.264",
    "h.265", "hevc", "xvid", "remux", "proper", "repack", "rerip",
];

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(19|20)\d{2}").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RESERVED_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

/// Sanitize an archive entry's base name into `Sanitized Name (YYYY).ext` or
/// `Sanitized Name.ext` when no year is found.
///
/// `forced_extension`, when set, overrides the entry's own extension — used
/// by the virtual-HTTP strategy, where the pointer file is always `.strm`
/// regardless of the underlying entry's extension (spec.md §4.7).
pub fn sanitize_name(entry_name: &str, forced_extension: Option<&str>) -> String {
    let path = Path::new(entry_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(entry_name);
    let ext = forced_extension
        .map(|s| s.to_string())
        .or_else(|| path.extension().and_then(|e| e.to_str()).map(String::from))
        .unwrap_or_default();

    // Strip a release-group suffix after the last dash.
    let without_group = match stem.rfind('-') {
        Some(idx) => &stem[..idx],
        None => stem,
    };

    // Collapse `.` separators to spaces.
    let spaced: String = without_group
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let year = YEAR_RE.find(&spaced).map(|m| m.as_str().to_string());

    // Remove blocklisted tokens (case-insensitive, whole-word-ish via
    // surrounding-whitespace split since tokens can contain punctuation).
    let mut words: Vec<String> = spaced
        .split_whitespace()
        .filter(|w| {
            let lower = w.to_ascii_lowercase();
            !BLOCKED_TOKENS.iter().any(|tok| lower == *tok)
        })
        .map(String::from)
        .collect();

    // Drop the year token itself from the body; it gets repositioned below.
    if let Some(ref y) = year {
        words.retain(|w| w != y);
    }

    let mut name = words.join(" ");
    name = WHITESPACE_RE.replace_all(&name, " ").trim().to_string();
    name = RESERVED_CHARS_RE.replace_all(&name, "").to_string();

    let base = match year {
        Some(y) => format!("{name} ({y})"),
        None => name,
    };

    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

/// Apply the collision policy: if `candidate` already exists under `dir`,
/// append ` (n)` before the extension with the lowest `n >= 2` that is free.
/// Never overwrites an existing file (spec.md §4.5 "Collision policy").
pub fn resolve_collision(dir: &Path, candidate: &str) -> PathBuf {
    let target = dir.join(candidate);
    if !target.exists() {
        return target;
    }

    let path = Path::new(candidate);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(candidate);
    let ext = path.extension().and_then(|e| e.to_str());

    let mut n = 2u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate_path = dir.join(&name);
        if !candidate_path.exists() {
            return candidate_path;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_release_tags_and_repositions_year() {
        let sanitized = sanitize_name("Movie.Title.2024.1080p.x264-GROUP.mkv", None);
        assert_eq!(sanitized, "Movie Title (2024).mkv");
    }

    #[test]
    fn forced_extension_overrides_entry_extension_for_pointer_files() {
        let sanitized = sanitize_name("Movie.Title.2024.1080p.x264-GROUP.mkv", Some("strm"));
        assert_eq!(sanitized, "Movie Title (2024).strm");
    }

    #[test]
    fn no_year_found_omits_parentheses() {
        // The last dash in the whole stem is treated as the release-group
        // separator (spec.md §4.5), so the "DL" half of "WEB-DL" is dropped
        // along with any real group tag would be.
        let sanitized = sanitize_name("Some.Show.S01E01.WEB-DL.mkv", None);
        assert_eq!(sanitized, "Some Show S01E01 WEB.mkv");
    }

    #[test]
    fn collision_policy_picks_lowest_free_n() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("Movie (2021).mkv")).unwrap();
        std::fs::File::create(dir.path().join("Movie (2021) (2).mkv")).unwrap();

        let resolved = resolve_collision(dir.path(), "Movie (2021).mkv");
        assert_eq!(resolved, dir.path().join("Movie (2021) (3).mkv"));
    }

    #[test]
    fn collision_policy_is_a_noop_when_name_is_free() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_collision(dir.path(), "Fresh (2020).mkv");
        assert_eq!(resolved, dir.path().join("Fresh (2020).mkv"));
    }

    #[test]
    fn reserved_filesystem_characters_are_stripped() {
        let sanitized = sanitize_name("Weird:Name?*2019-X.mkv", None);
        assert!(!sanitized.contains(':'));
        assert!(!sanitized.contains('?'));
        assert!(!sanitized.contains('*'));
    }
}
