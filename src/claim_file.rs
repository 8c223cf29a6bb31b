use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{HandlingMode, Lease};
use crate::store::checkin;
use crate::store::checkout;
use crate::store::lease::{LeaseAcquisition, LeaseStore};

/// One payload file discovered in a check-in directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimFile {
    pub path: PathBuf,
    pub mode: HandlingMode,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    pub released: bool,
}

impl ClaimFile {
    pub fn new(path: impl Into<PathBuf>, mode: HandlingMode, created_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            mode,
            created_at,
            lease: None,
            released: false,
        }
    }

    pub fn with_lease(mut self, lease: Option<Lease>) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_released(mut self, released: bool) -> Self {
        self.released = released;
        self
    }

    pub fn lock_time(&self) -> Option<DateTime<Utc>> {
        self.lease.as_ref().map(|l| l.acquired_at)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn lock(
        &self,
        leases: &dyn LeaseStore,
        holder: &str,
        now: DateTime<Utc>,
        timeout: TimeDelta,
    ) -> Result<LeaseAcquisition> {
        leases.acquire(&self.path, holder, now, timeout)
    }

    /// Copy the payload into `destination_dir`; safe to repeat.
    pub fn gather(&self, destination_dir: &Path) -> Result<PathBuf> {
        checkout::gather(&self.path, destination_dir)
    }

    /// Remove the original from the check-in side.
    pub fn release(&self) -> Result<()> {
        checkin::release(&self.path)
    }

    pub fn unlock(&self, leases: &dyn LeaseStore, holder: &str) -> Result<bool> {
        leases.release(&self.path, holder)
    }
}
