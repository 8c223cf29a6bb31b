use std::path::Path;
use std::sync::Arc;

use crate::claim_file::ClaimFile;
use crate::error::{ClaimStoreError, Result};
use crate::model::HandlingMode;
use crate::store::checkin;
use crate::store::lease::LeaseStore;

/// Read the handling mode from the file name's final extension.
///
/// `msg-42.CLAIMED` is claimed, `msg-42.tracked` is tracked, and anything
/// else (including no extension at all) is rejected.
pub fn handling_mode(path: &Path) -> Result<HandlingMode> {
    let token = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    HandlingMode::from_token(&token).ok_or_else(|| ClaimStoreError::UnsupportedHandlingMode {
        path: path.display().to_string(),
        token,
    })
}

/// Turns a discovered path into a [`ClaimFile`] with its on-disk state.
pub struct ClaimFileClassifier {
    leases: Arc<dyn LeaseStore>,
}

impl ClaimFileClassifier {
    pub fn new(leases: Arc<dyn LeaseStore>) -> Self {
        Self { leases }
    }

    pub fn classify(&self, path: &Path) -> Result<ClaimFile> {
        let mode = handling_mode(path)?;
        let created_at = checkin::creation_time(path)?;
        let lease = self.leases.current(path)?;
        Ok(ClaimFile::new(path, mode, created_at)
            .with_lease(lease)
            .with_released(checkin::is_released(path)))
    }
}
