//! Per-archive-set stabilization bookkeeping (spec.md §4.3).
//!
//! A set is "stable" once two consecutive polls see identical size and
//! mtime for every known volume and the newest mtime predates the
//! stabilization window. Volumes that can't be stat'd (vanished mid-probe,
//! or simply not arrived yet) are tracked as `None` so a set with only some
//! volumes present never spuriously looks stable.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSnapshot {
    pub size: u64,
    pub mtime: SystemTime,
}

fn stat_volume(path: &PathBuf) -> Option<VolumeSnapshot> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(VolumeSnapshot {
        size: meta.len(),
        mtime: meta.modified().ok()?,
    })
}

/// Poll every known volume of a set, tolerating the ones that don't exist yet.
pub fn poll_set(volumes: &[PathBuf]) -> Vec<Option<VolumeSnapshot>> {
    volumes.iter().map(stat_volume).collect()
}

/// Tracks one archive set from first sighting through stabilization.
pub struct SetTracker {
    pub volumes: Vec<PathBuf>,
    pub first_seen: Instant,
    last_snapshot: Vec<Option<VolumeSnapshot>>,
}

impl SetTracker {
    pub fn new(volumes: Vec<PathBuf>) -> Self {
        let last_snapshot = poll_set(&volumes);
        Self {
            volumes,
            first_seen: Instant::now(),
            last_snapshot,
        }
    }

    /// Re-poll and report whether the set is now stable: every volume
    /// present, unchanged since the last poll, and not modified within
    /// `stabilization_window`.
    pub fn poll(&mut self, stabilization_window: Duration) -> bool {
        let current = poll_set(&self.volumes);
        let stable = volumes_match(&self.last_snapshot, &current) && current.iter().all(Option::is_some);
        self.last_snapshot = current;

        if !stable {
            return false;
        }

        let newest = self
            .last_snapshot
            .iter()
            .flatten()
            .map(|s| s.mtime)
            .max();
        match newest {
            Some(mtime) => mtime.elapsed().unwrap_or(Duration::ZERO) >= stabilization_window,
            None => false,
        }
    }

    pub fn is_expired(&self, max_file_age: Duration) -> bool {
        self.first_seen.elapsed() >= max_file_age
    }
}

fn volumes_match(a: &[Option<VolumeSnapshot>], b: &[Option<VolumeSnapshot>]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;

    #[test]
    fn stable_once_two_identical_polls_past_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X.rar");
        fs::write(&path, b"hello").unwrap();

        let mut tracker = SetTracker::new(vec![path]);
        // First poll after construction: same content, but window not yet elapsed.
        assert!(!tracker.poll(Duration::from_secs(3600)));
        // With a zero window, an unchanged poll is immediately stable.
        assert!(tracker.poll(Duration::ZERO));
    }

    #[test]
    fn missing_volume_never_reports_stable() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("X.part01.rar");
        let missing = dir.path().join("X.part02.rar");
        fs::write(&present, b"hello").unwrap();

        let mut tracker = SetTracker::new(vec![present, missing]);
        assert!(!tracker.poll(Duration::ZERO));
    }

    #[test]
    fn growing_file_never_reports_stable_between_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X.rar");
        fs::write(&path, b"a").unwrap();
        let mut tracker = SetTracker::new(vec![path.clone()]);
        sleep(Duration::from_millis(10));
        fs::write(&path, b"ab").unwrap();
        assert!(!tracker.poll(Duration::ZERO));
    }

    #[test]
    fn expiry_is_measured_from_first_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X.rar");
        fs::write(&path, b"a").unwrap();
        let tracker = SetTracker::new(vec![path]);
        assert!(!tracker.is_expired(Duration::from_secs(3600)));
        assert!(tracker.is_expired(Duration::ZERO));
    }
}
