use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::claim_file::ClaimFile;
use crate::clock::Clock;

/// A lock outliving this many timeouts is reported as troublesome.
pub const TROUBLESOME_LOCK_FACTOR: i32 = 3;

/// Files older than this are reported even when nobody holds them.
pub const DEFAULT_STALE_FILE_AGE: TimeDelta = TimeDelta::hours(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// No lock recorded (or one with zero age).
    Unlocked,
    /// Locked longer ago than the timeout; the holder is presumed gone.
    Abandoned,
    /// Presumed to be in the hands of another collector right now.
    Held,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        !matches!(self, Self::Held)
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::Held => write!(f, "held"),
        }
    }
}

/// Everything the filter concludes about one file at one instant.
///
/// The reclaim decision and the two alerts use different thresholds and are
/// computed independently: an abandoned lock can be both eligible and
/// troublesome in the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub eligibility: Eligibility,
    pub lock_age: Option<TimeDelta>,
    pub file_age: TimeDelta,
    pub troublesome_lock: bool,
    pub stale_file: bool,
}

pub struct CollectibilityFilter {
    lock_timeout: TimeDelta,
    stale_file_age: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl CollectibilityFilter {
    pub fn new(lock_timeout: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            lock_timeout,
            stale_file_age: DEFAULT_STALE_FILE_AGE,
            clock,
        }
    }

    pub fn with_stale_file_age(mut self, stale_file_age: TimeDelta) -> Self {
        self.stale_file_age = stale_file_age;
        self
    }

    pub fn assess(&self, file: &ClaimFile, now: DateTime<Utc>) -> Assessment {
        let lock_age = file.lock_time().map(|locked_at| now - locked_at);

        let eligibility = match lock_age {
            None => Eligibility::Unlocked,
            Some(age) if age == TimeDelta::zero() => Eligibility::Unlocked,
            Some(age) if age > self.lock_timeout => Eligibility::Abandoned,
            // Includes negative ages: a lock stamped in our future is live.
            Some(_) => Eligibility::Held,
        };

        let troublesome_lock = lock_age
            .is_some_and(|age| age > self.lock_timeout * TROUBLESOME_LOCK_FACTOR);
        let file_age = (now - file.created_at).max(TimeDelta::zero());

        Assessment {
            eligibility,
            lock_age,
            file_age,
            troublesome_lock,
            stale_file: file_age > self.stale_file_age,
        }
    }

    /// Lazily yield the files eligible for collection, raising alerts for every
    /// file inspected along the way. The clock is read once per file.
    pub fn filter<'a, I>(&'a self, files: I) -> impl Iterator<Item = ClaimFile> + 'a
    where
        I: IntoIterator<Item = ClaimFile>,
        I::IntoIter: 'a,
    {
        files.into_iter().filter(move |file| self.admit(file))
    }

    fn admit(&self, file: &ClaimFile) -> bool {
        let now = self.clock.now();
        let assessment = self.assess(file, now);
        let path = file.path.display().to_string();
        let holder = file.lease.as_ref().map(|l| l.holder.as_str()).unwrap_or("-");
        let lock_age_secs = assessment.lock_age.map(|a| a.num_seconds());

        if assessment.troublesome_lock {
            warn!(
                path = %path,
                holder,
                lock_age_secs,
                timeout_secs = self.lock_timeout.num_seconds(),
                "troublesome lock: held for more than {TROUBLESOME_LOCK_FACTOR} lock timeouts without completing"
            );
        }
        if assessment.stale_file {
            error!(
                path = %path,
                mode = %file.mode,
                file_age_secs = assessment.file_age.num_seconds(),
                max_age_secs = self.stale_file_age.num_seconds(),
                "file has stayed uncollected for too long"
            );
        }

        match assessment.eligibility {
            Eligibility::Held => {
                debug!(path = %path, holder, lock_age_secs, "skipping file locked by another collector")
            }
            Eligibility::Abandoned => {
                debug!(path = %path, holder, lock_age_secs, "lock expired, file is eligible for reclaim")
            }
            Eligibility::Unlocked => {}
        }
        assessment.eligibility.is_eligible()
    }
}
