use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How a payload is handled once it has been copied to the check-out directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingMode {
    /// Only kept to relieve the pipeline store; deleted after the copy.
    Claimed,
    /// Kept locally for replay and audit; copied but never deleted.
    Tracked,
}

impl HandlingMode {
    pub const ALL: [HandlingMode; 2] = [HandlingMode::Claimed, HandlingMode::Tracked];

    /// The file-name token that selects this mode.
    pub fn token(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Tracked => "tracked",
        }
    }

    /// Case-insensitive lookup of a file-name token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.token().eq_ignore_ascii_case(token))
    }
}

impl std::fmt::Display for HandlingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// A durable, timestamped claim of exclusive handling rights over one payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            holder: holder.into(),
            acquired_at,
        }
    }

    /// Age of the lease at `now`. Negative when the holder's clock runs ahead.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.acquired_at
    }

    /// A lease older than the timeout is presumed abandoned and may be reclaimed.
    pub fn is_abandoned(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        self.age(now) > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_case_insensitive() {
        assert_eq!(HandlingMode::from_token("claimed"), Some(HandlingMode::Claimed));
        assert_eq!(HandlingMode::from_token("TRACKED"), Some(HandlingMode::Tracked));
        assert_eq!(HandlingMode::from_token("Claimed"), Some(HandlingMode::Claimed));
        assert_eq!(HandlingMode::from_token("claim"), None);
        assert_eq!(HandlingMode::from_token(""), None);
    }

    #[test]
    fn lease_round_trips_json() {
        let lease = Lease::new("agent-1", Utc::now());
        let json = serde_json::to_string(&lease).unwrap();
        let parsed: Lease = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, lease);
    }

    #[test]
    fn lease_abandonment_is_strictly_after_timeout() {
        let acquired = Utc::now();
        let lease = Lease::new("agent-1", acquired);
        let timeout = TimeDelta::minutes(30);

        assert!(!lease.is_abandoned(acquired + timeout, timeout));
        assert!(lease.is_abandoned(acquired + timeout + TimeDelta::seconds(1), timeout));
        assert!(!lease.is_abandoned(acquired - TimeDelta::minutes(5), timeout));
    }
}
