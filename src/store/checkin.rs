use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::lease::LOCK_SUFFIX;

/// Suffix of the sidecar recording that a payload has been released.
pub const RELEASED_SUFFIX: &str = ".released";

/// One check-in directory as seen by the collector.
///
/// Payloads sit at the top level. Next to each one may live:
///   - `<name>.lock`: lease marker
///   - `<name>.released`: release in progress or interrupted
///
/// Hidden entries (guard file, temp files) are never payloads.
pub struct CheckInDirectory {
    root: PathBuf,
}

impl CheckInDirectory {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths of every entry that may be a payload, sorted for determinism.
    pub fn list_payloads(&self) -> Result<Vec<PathBuf>> {
        let mut payloads = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_payload_name(&name) {
                payloads.push(entry.path());
            }
        }
        payloads.sort();
        Ok(payloads)
    }

    /// Delete release markers whose payload is already gone.
    pub fn sweep_release_markers(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            if let Some(payload_name) = name.strip_suffix(RELEASED_SUFFIX)
                && !payload_name.is_empty()
                && !self.root.join(payload_name).exists()
                && remove_if_present(&entry.path())?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_payload_name(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with(LOCK_SUFFIX) && !name.ends_with(RELEASED_SUFFIX)
}

pub fn released_marker_path(payload: &Path) -> PathBuf {
    let mut name = payload
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(RELEASED_SUFFIX);
    payload.with_file_name(name)
}

pub fn is_released(payload: &Path) -> bool {
    released_marker_path(payload).exists()
}

/// Creation time when the filesystem records one, otherwise last modification.
pub fn creation_time(payload: &Path) -> Result<DateTime<Utc>> {
    let meta = fs::metadata(payload)?;
    let stamp = meta.created().or_else(|_| meta.modified())?;
    Ok(DateTime::<Utc>::from(stamp))
}

/// Mark the payload released, delete it, then drop the marker.
///
/// Each step tolerates having been done already, so an interrupted release
/// (or a racing agent) converges on the same end state.
pub fn release(payload: &Path) -> Result<()> {
    let marker = released_marker_path(payload);
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(file) => file.sync_all()?,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }
    remove_if_present(payload)?;
    remove_if_present(&marker)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn list_skips_sidecars_hidden_files_and_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("b.claimed"), b"1").unwrap();
        fs::write(root.join("a.tracked"), b"2").unwrap();
        fs::write(root.join("odd.bin"), b"3").unwrap();
        fs::write(root.join("a.tracked.lock"), b"{}").unwrap();
        fs::write(root.join("b.claimed.released"), b"").unwrap();
        fs::write(root.join(".claim-store.guard"), b"").unwrap();
        fs::create_dir(root.join("nested.claimed")).unwrap();

        let names: Vec<String> = CheckInDirectory::open(root)
            .list_payloads()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tracked", "b.claimed", "odd.bin"]);
    }

    #[test]
    fn release_removes_payload_and_marker() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("m.claimed");
        fs::write(&payload, b"body").unwrap();

        release(&payload).unwrap();
        assert!(!payload.exists());
        assert!(!released_marker_path(&payload).exists());

        // Releasing again is a no-op.
        release(&payload).unwrap();
    }

    #[test]
    fn interrupted_release_is_visible_and_completes() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("m.claimed");
        fs::write(&payload, b"body").unwrap();
        fs::write(released_marker_path(&payload), b"").unwrap();

        assert!(is_released(&payload));
        release(&payload).unwrap();
        assert!(!payload.exists());
        assert!(!is_released(&payload));
    }

    #[test]
    fn sweep_drops_release_markers_without_payload() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("kept.claimed"), b"x").unwrap();
        fs::write(root.join("kept.claimed.released"), b"").unwrap();
        fs::write(root.join("gone.claimed.released"), b"").unwrap();

        let removed = CheckInDirectory::open(root).sweep_release_markers().unwrap();
        assert_eq!(removed, 1);
        assert!(root.join("kept.claimed.released").exists());
        assert!(!root.join("gone.claimed.released").exists());
    }

    #[test]
    fn creation_time_is_recent_for_new_files() {
        let dir = tempdir().unwrap();
        let payload = dir.path().join("m.tracked");
        fs::write(&payload, b"body").unwrap();
        let created = creation_time(&payload).unwrap();
        assert!((Utc::now() - created).num_seconds().abs() < 60);
    }
}
