use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("unsupported handling mode '{token}' in file name: {path}")]
    UnsupportedHandlingMode { path: String, token: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("lease on {path} is held by '{holder}'")]
    LeaseHeld { path: String, holder: String },

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration file not found: {0} (run `claim-store init` first)")]
    ConfigNotFound(String),

    #[error("collection scheduler is already running")]
    SchedulerAlreadyRunning,

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ClaimStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedHandlingMode { .. } => "unsupported_handling_mode",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::LeaseHeld { .. } => "lease_held",
            Self::Locked(_) => "locked",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::SchedulerAlreadyRunning => "scheduler_already_running",
            Self::TaskFailed(_) => "task_failed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
        }
    }

    /// Errors caused by contention with other collectors or by flaky storage.
    /// The affected file is simply re-evaluated on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LeaseHeld { .. } | Self::Locked(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ClaimStoreError>;
