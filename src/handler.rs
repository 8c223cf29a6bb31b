use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, warn};

use crate::claim_file::ClaimFile;
use crate::clock::Clock;
use crate::error::{ClaimStoreError, Result};
use crate::model::{HandlingMode, Lease};
use crate::store::lease::LeaseStore;

/// What a handler needs from the collector to drive one file.
pub struct HandlerContext<'a> {
    pub leases: &'a dyn LeaseStore,
    pub holder: &'a str,
    pub clock: &'a dyn Clock,
    pub lock_timeout: TimeDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectOutcome {
    pub path: PathBuf,
    pub mode: HandlingMode,
    pub destination: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaimed_from: Option<Lease>,
}

/// The collection sequence for one eligible file, chosen by handling mode.
///
/// Claimed: lock, gather, release, unlock.
/// Tracked: lock, gather, unlock; the original stays in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBodyHandler {
    Claimed(ClaimFile),
    Tracked(ClaimFile),
}

impl MessageBodyHandler {
    /// Fails without touching storage when a tracked file is already released.
    pub fn new(file: ClaimFile) -> Result<Self> {
        match file.mode {
            HandlingMode::Claimed => Ok(Self::Claimed(file)),
            HandlingMode::Tracked if file.released => {
                Err(ClaimStoreError::InvariantViolation(format!(
                    "tracked file {} is marked released",
                    file.path.display()
                )))
            }
            HandlingMode::Tracked => Ok(Self::Tracked(file)),
        }
    }

    pub fn file(&self) -> &ClaimFile {
        match self {
            Self::Claimed(file) | Self::Tracked(file) => file,
        }
    }

    pub fn mode(&self) -> HandlingMode {
        match self {
            Self::Claimed(_) => HandlingMode::Claimed,
            Self::Tracked(_) => HandlingMode::Tracked,
        }
    }

    pub fn collect(&self, ctx: &HandlerContext<'_>, destination_dir: &Path) -> Result<CollectOutcome> {
        let file = self.file();
        let acquisition = file.lock(ctx.leases, ctx.holder, ctx.clock.now(), ctx.lock_timeout)?;
        if let Some(previous) = &acquisition.reclaimed_from {
            warn!(
                path = %file.path.display(),
                previous_holder = %previous.holder,
                previous_acquired_at = %previous.acquired_at,
                "reclaimed abandoned lease"
            );
        }

        let destination = match self.transfer(destination_dir) {
            Ok(destination) => destination,
            Err(e) => {
                // Hand the file back so the next cycle can retry it right away.
                if let Err(unlock_err) = file.unlock(ctx.leases, ctx.holder) {
                    debug!(path = %file.path.display(), error = %unlock_err, "unlock after failed transfer failed");
                }
                return Err(e);
            }
        };

        match file.unlock(ctx.leases, ctx.holder) {
            Ok(true) => {}
            Ok(false) => debug!(
                path = %file.path.display(),
                "lease was no longer ours at unlock"
            ),
            Err(e) => warn!(
                path = %file.path.display(),
                error = %e,
                "collected file but could not remove lock marker"
            ),
        }

        Ok(CollectOutcome {
            path: file.path.clone(),
            mode: self.mode(),
            destination,
            reclaimed_from: acquisition.reclaimed_from,
        })
    }

    fn transfer(&self, destination_dir: &Path) -> Result<PathBuf> {
        match self {
            Self::Claimed(file) => {
                let destination = file.gather(destination_dir)?;
                file.release()?;
                Ok(destination)
            }
            Self::Tracked(file) => file.gather(destination_dir),
        }
    }
}
