use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ClaimStoreError, Result};

/// Copy `source` into `destination_dir` under the same file name.
///
/// The bytes land in a hidden temp file in the destination directory and are
/// renamed into place only after an fsync, so consumers of the check-out
/// directory never observe a partial file. Repeating the copy replaces the
/// file with identical content.
pub fn gather(source: &Path, destination_dir: &Path) -> Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        ClaimStoreError::InvariantViolation(format!(
            "payload path has no file name: {}",
            source.display()
        ))
    })?;
    let target = destination_dir.join(file_name);

    let mut input = File::open(source)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".gather-")
        .suffix(".tmp")
        .tempfile_in(destination_dir)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

pub fn ensure_dir(destination_dir: &Path) -> Result<()> {
    fs::create_dir_all(destination_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn repeated_gather_is_byte_identical() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("big.claimed");
        let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &body).unwrap();

        let first = gather(&source, dst_dir.path()).unwrap();
        let once = fs::read(&first).unwrap();
        let second = gather(&source, dst_dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&second).unwrap(), once);
        assert_eq!(once, body);

        let entries: Vec<_> = fs::read_dir(dst_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp files must not linger");
    }

    #[test]
    fn missing_source_leaves_destination_untouched() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("gone.claimed");

        assert!(gather(&source, dst_dir.path()).is_err());
        assert_eq!(fs::read_dir(dst_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn gather_overwrites_stale_destination_copy() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("m.tracked");
        fs::write(&source, b"complete body").unwrap();
        fs::write(dst_dir.path().join("m.tracked"), b"compl").unwrap();

        gather(&source, dst_dir.path()).unwrap();
        assert_eq!(
            fs::read(dst_dir.path().join("m.tracked")).unwrap(),
            b"complete body"
        );
    }
}
