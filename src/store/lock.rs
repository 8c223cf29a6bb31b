use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{ClaimStoreError, Result};

/// Name of the per-directory guard file serialising lease decisions.
pub const GUARD_FILE: &str = ".claim-store.guard";

const GUARD_ATTEMPTS: u32 = 50;
const GUARD_BACKOFF: Duration = Duration::from_millis(20);

/// Acquire an exclusive lock on a file, returning the locked File handle.
/// The lock is released when the File is dropped.
///
/// Guard sections are short, so contention is retried for about a second
/// before giving up with `Locked`.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = open_lock_file(path)?;
    for attempt in 0..GUARD_ATTEMPTS {
        if file.try_lock_exclusive().is_ok() {
            return Ok(file);
        }
        if attempt + 1 < GUARD_ATTEMPTS {
            thread::sleep(GUARD_BACKOFF);
        }
    }
    Err(ClaimStoreError::Locked(path.display().to_string()))
}

/// Release lock explicitly (normally handled by Drop).
pub fn release_lock(file: File) -> Result<()> {
    FileExt::unlock(&file)?;
    Ok(())
}

pub fn guard_path(directory: &Path) -> PathBuf {
    directory.join(GUARD_FILE)
}

fn open_lock_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hold(path: &Path) -> File {
        let file = open_lock_file(path).unwrap();
        file.try_lock_exclusive().unwrap();
        file
    }

    #[test]
    fn contended_guard_gives_up_with_locked() {
        let dir = tempdir().unwrap();
        let lock_path = guard_path(dir.path());

        let held = hold(&lock_path);
        assert!(matches!(
            acquire_lock(&lock_path),
            Err(ClaimStoreError::Locked(_))
        ));
        release_lock(held).unwrap();
        let file = acquire_lock(&lock_path).unwrap();
        release_lock(file).unwrap();
    }

    #[test]
    fn retry_waits_for_holder_to_release() {
        let dir = tempdir().unwrap();
        let lock_path = guard_path(dir.path());

        let held = hold(&lock_path);
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            release_lock(held).unwrap();
        });

        let file = acquire_lock(&lock_path).unwrap();
        releaser.join().unwrap();
        release_lock(file).unwrap();
    }
}
