//! Archive-set naming conventions (spec.md §3 "Archive set").
//!
//! Two conventions exist: the legacy `name.rar`, `name.r00`, `name.r01`, …
//! `name.r99`, and the new `name.part01.rar`, `name.part02.rar`, … The first
//! volume (`.rar` in both schemes) is the handle used for all reads.

use std::path::{Path, PathBuf};

/// The full, ordered list of volume paths belonging to one archive set,
/// resolved from the first volume's path by name convention.
pub fn resolve_volumes(first_volume: &Path) -> Vec<PathBuf> {
    let Some(dir) = first_volume.parent() else {
        return vec![first_volume.to_path_buf()];
    };
    let Some(file_name) = first_volume.file_name().and_then(|n| n.to_str()) else {
        return vec![first_volume.to_path_buf()];
    };

    if let Some(stem) = new_scheme_stem(file_name) {
        return resolve_new_scheme(dir, &stem);
    }
    if file_name.to_ascii_lowercase().ends_with(".rar") {
        return resolve_legacy_scheme(dir, file_name);
    }
    vec![first_volume.to_path_buf()]
}

/// `name.partNN.rar` → `Some("name")`. Only matches the first volume name.
fn new_scheme_stem(file_name: &str) -> Option<String> {
    let lower = file_name.to_ascii_lowercase();
    if !lower.ends_with(".rar") {
        return None;
    }
    let without_ext = &file_name[..file_name.len() - 4];
    let lower_without_ext = without_ext.to_ascii_lowercase();
    let idx = lower_without_ext.rfind(".part")?;
    let part_tag = &lower_without_ext[idx + 5..];
    if part_tag.len() < 2 || !part_tag.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Only the first volume (part 1, in whatever digit width) is a valid handle.
    let part_num: u32 = part_tag.parse().ok()?;
    if part_num != 1 {
        return None;
    }
    Some(without_ext[..idx].to_string())
}

fn resolve_new_scheme(dir: &Path, stem: &str) -> Vec<PathBuf> {
    let mut volumes = Vec::new();
    // Try common digit widths (2 and 3) since the convention doesn't pin one.
    for width in [2usize, 3] {
        let mut n = 1u32;
        let mut found = Vec::new();
        loop {
            let candidate = dir.join(format!("{stem}.part{n:0width$}.rar", width = width));
            if candidate.is_file() {
                found.push(candidate);
                n += 1;
            } else {
                break;
            }
        }
        if !found.is_empty() {
            volumes = found;
            break;
        }
    }
    if volumes.is_empty() {
        volumes.push(dir.join(format!("{stem}.part01.rar")));
    }
    volumes
}

fn resolve_legacy_scheme(dir: &Path, first_volume_name: &str) -> Vec<PathBuf> {
    let mut volumes = vec![dir.join(first_volume_name)];
    let stem = &first_volume_name[..first_volume_name.len() - 4];
    for n in 0..100u32 {
        let candidate = dir.join(format!("{stem}.r{n:02}"));
        if candidate.is_file() {
            volumes.push(candidate);
        } else if n > 0 {
            // Volumes are contiguous; stop at the first gap.
            break;
        }
    }
    volumes
}

/// True if every referenced volume of the set exists and is readable.
pub fn all_volumes_present(volumes: &[PathBuf]) -> bool {
    volumes.iter().all(|p| p.is_file())
}

/// Given any member of an archive set (the first volume or a later one),
/// resolve the first-volume handle path used to identify the whole set.
/// Returns `None` for files that aren't archive volumes at all.
pub fn handle_for_member(path: &Path) -> Option<PathBuf> {
    let dir = path.parent()?;
    let file_name = path.file_name()?.to_str()?;
    let lower = file_name.to_ascii_lowercase();

    if let Some(idx) = lower.rfind(".part") {
        if lower.ends_with(".rar") {
            let part_tag = &lower[idx + 5..lower.len() - 4];
            if !part_tag.is_empty() && part_tag.chars().all(|c| c.is_ascii_digit()) {
                let width = part_tag.len();
                let stem = &file_name[..idx];
                return Some(dir.join(format!("{stem}.part{:0width$}.rar", 1, width = width)));
            }
        }
        return None;
    }

    if lower.ends_with(".rar") {
        return Some(path.to_path_buf());
    }
    // Legacy `.rNN` member: the handle is the same stem with `.rar`.
    if lower.len() >= 4 {
        let (stem_part, suffix) = lower.split_at(lower.len() - 3);
        if stem_part.ends_with('.')
            && suffix.starts_with('r')
            && suffix[1..].chars().all(|c| c.is_ascii_digit())
        {
            let stem = &file_name[..file_name.len() - 3];
            return Some(dir.join(format!("{stem}rar")));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn resolves_new_scheme_two_digit_parts() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            File::create(dir.path().join(format!("X.part{n:02}.rar"))).unwrap();
        }
        let first = dir.path().join("X.part01.rar");
        let volumes = resolve_volumes(&first);
        assert_eq!(volumes.len(), 3);
        assert!(volumes[2].ends_with("X.part03.rar"));
    }

    #[test]
    fn resolves_legacy_scheme_r00_style() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("Test.rar")).unwrap();
        File::create(dir.path().join("Test.r00")).unwrap();
        File::create(dir.path().join("Test.r01")).unwrap();
        let first = dir.path().join("Test.rar");
        let volumes = resolve_volumes(&first);
        assert_eq!(volumes.len(), 3);
    }

    #[test]
    fn single_volume_archive_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("Solo.rar")).unwrap();
        let first = dir.path().join("Solo.rar");
        let volumes = resolve_volumes(&first);
        assert_eq!(volumes, vec![first]);
    }

    #[test]
    fn handle_for_member_maps_legacy_volumes_to_first() {
        let dir = PathBuf::from("/src");
        let handle = handle_for_member(&dir.join("Test.r01")).unwrap();
        assert_eq!(handle, dir.join("Test.rar"));
    }

    #[test]
    fn handle_for_member_maps_new_scheme_volumes_to_part_one() {
        let dir = PathBuf::from("/src");
        let handle = handle_for_member(&dir.join("X.part03.rar")).unwrap();
        assert_eq!(handle, dir.join("X.part01.rar"));
    }

    #[test]
    fn handle_for_member_rejects_unrelated_files() {
        let dir = PathBuf::from("/src");
        assert_eq!(handle_for_member(&dir.join("readme.txt")), None);
    }
}
