use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::error::{ClaimStoreError, Result};
use crate::model::Lease;
use crate::store::lock;

/// Suffix of the sidecar marker holding a payload's lease.
pub const LOCK_SUFFIX: &str = ".lock";

/// Holder recorded for markers that could not be parsed.
const UNKNOWN_HOLDER: &str = "unknown";

/// Result of a successful [`LeaseStore::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseAcquisition {
    pub lease: Lease,
    /// Set when an abandoned lease of another holder was taken over.
    pub reclaimed_from: Option<Lease>,
}

/// Durable, cross-process lease bookkeeping for payload files.
pub trait LeaseStore: Send + Sync {
    /// The lease currently recorded for `payload`, if any.
    fn current(&self, payload: &Path) -> Result<Option<Lease>>;

    /// Take the lease for `holder`, reclaiming it if the recorded one is older
    /// than `timeout`. Fails with `LeaseHeld` while another holder's lease is live.
    fn acquire(
        &self,
        payload: &Path,
        holder: &str,
        now: DateTime<Utc>,
        timeout: TimeDelta,
    ) -> Result<LeaseAcquisition>;

    /// Drop the lease if `holder` still owns it. Returns whether anything was removed.
    fn release(&self, payload: &Path, holder: &str) -> Result<bool>;

    /// Remove abandoned leases whose payload no longer exists in `directory`.
    fn prune(&self, directory: &Path, now: DateTime<Utc>, timeout: TimeDelta) -> Result<usize>;
}

/// Shared acquire policy: returns the reclaimed lease, if any.
fn check_acquirable(
    payload: &Path,
    existing: Option<Lease>,
    holder: &str,
    now: DateTime<Utc>,
    timeout: TimeDelta,
) -> Result<Option<Lease>> {
    match existing {
        None => Ok(None),
        Some(lease) if lease.holder == holder => Ok(None),
        Some(lease) if lease.is_abandoned(now, timeout) => Ok(Some(lease)),
        Some(lease) => Err(ClaimStoreError::LeaseHeld {
            path: payload.display().to_string(),
            holder: lease.holder,
        }),
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Leases stored as JSON sidecars (`<payload>.lock`) next to each payload.
///
/// Every read-decide-write happens under the directory's guard lock, and
/// markers are replaced by atomic rename so readers never see partial JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLeaseStore;

impl FsLeaseStore {
    pub fn new() -> Self {
        Self
    }

    pub fn marker_path(payload: &Path) -> PathBuf {
        let mut name = payload
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(LOCK_SUFFIX);
        payload.with_file_name(name)
    }

    fn directory_of(payload: &Path) -> &Path {
        payload
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    fn read_marker(marker: &Path) -> Result<Option<Lease>> {
        let data = match fs::read_to_string(marker) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Lease>(&data) {
            Ok(lease) => Ok(Some(lease)),
            Err(_) => {
                // Unreadable marker: age it by its mtime so it still expires.
                let modified = fs::metadata(marker)?.modified()?;
                Ok(Some(Lease::new(UNKNOWN_HOLDER, DateTime::<Utc>::from(modified))))
            }
        }
    }

    fn write_marker(marker: &Path, lease: &Lease) -> Result<()> {
        let dir = Self::directory_of(marker);
        let mut tmp = tempfile::Builder::new()
            .prefix(".lease-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(serde_json::to_string(lease)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(marker).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_marker(marker: &Path) -> Result<bool> {
        match fs::remove_file(marker) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl LeaseStore for FsLeaseStore {
    fn current(&self, payload: &Path) -> Result<Option<Lease>> {
        Self::read_marker(&Self::marker_path(payload))
    }

    fn acquire(
        &self,
        payload: &Path,
        holder: &str,
        now: DateTime<Utc>,
        timeout: TimeDelta,
    ) -> Result<LeaseAcquisition> {
        let guard = lock::acquire_lock(&lock::guard_path(Self::directory_of(payload)))?;
        let marker = Self::marker_path(payload);

        let outcome = Self::read_marker(&marker).and_then(|existing| {
            let reclaimed_from = check_acquirable(payload, existing, holder, now, timeout)?;
            let lease = Lease::new(holder, now);
            Self::write_marker(&marker, &lease)?;
            Ok(LeaseAcquisition {
                lease,
                reclaimed_from,
            })
        });

        lock::release_lock(guard)?;
        outcome
    }

    fn release(&self, payload: &Path, holder: &str) -> Result<bool> {
        let guard = lock::acquire_lock(&lock::guard_path(Self::directory_of(payload)))?;
        let marker = Self::marker_path(payload);

        let outcome = Self::read_marker(&marker).and_then(|existing| match existing {
            Some(lease) if lease.holder == holder => Self::remove_marker(&marker),
            _ => Ok(false),
        });

        lock::release_lock(guard)?;
        outcome
    }

    fn prune(&self, directory: &Path, now: DateTime<Utc>, timeout: TimeDelta) -> Result<usize> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            if let Some(payload_name) = name.strip_suffix(LOCK_SUFFIX)
                && !payload_name.is_empty()
            {
                let payload = directory.join(payload_name);
                if !payload.exists() {
                    candidates.push((entry.path(), payload));
                }
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        let guard = lock::acquire_lock(&lock::guard_path(directory))?;
        let mut removed = 0;
        let outcome = (|| -> Result<()> {
            for (marker, payload) in candidates {
                // Re-check under the guard: a payload may have been re-created.
                if payload.exists() {
                    continue;
                }
                if let Some(lease) = Self::read_marker(&marker)?
                    && lease.is_abandoned(now, timeout)
                    && Self::remove_marker(&marker)?
                {
                    removed += 1;
                }
            }
            Ok(())
        })();
        lock::release_lock(guard)?;
        outcome.map(|()| removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local lease table with the same policy as [`FsLeaseStore`].
/// Counts every call so callers can assert that no lease traffic happened.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<PathBuf, Lease>>,
    operations: AtomicUsize,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lease directly, bypassing the acquire policy.
    pub fn insert(&self, payload: impl Into<PathBuf>, lease: Lease) {
        self.leases.lock().insert(payload.into(), lease);
    }

    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn current(&self, payload: &Path) -> Result<Option<Lease>> {
        self.touch();
        Ok(self.leases.lock().get(payload).cloned())
    }

    fn acquire(
        &self,
        payload: &Path,
        holder: &str,
        now: DateTime<Utc>,
        timeout: TimeDelta,
    ) -> Result<LeaseAcquisition> {
        self.touch();
        let mut leases = self.leases.lock();
        let existing = leases.get(payload).cloned();
        let reclaimed_from = check_acquirable(payload, existing, holder, now, timeout)?;
        let lease = Lease::new(holder, now);
        leases.insert(payload.to_path_buf(), lease.clone());
        Ok(LeaseAcquisition {
            lease,
            reclaimed_from,
        })
    }

    fn release(&self, payload: &Path, holder: &str) -> Result<bool> {
        self.touch();
        let mut leases = self.leases.lock();
        match leases.get(payload) {
            Some(lease) if lease.holder == holder => {
                leases.remove(payload);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn prune(&self, directory: &Path, now: DateTime<Utc>, timeout: TimeDelta) -> Result<usize> {
        self.touch();
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|payload, lease| {
            payload.parent() != Some(directory)
                || payload.exists()
                || !lease.is_abandoned(now, timeout)
        });
        Ok(before - leases.len())
    }
}
