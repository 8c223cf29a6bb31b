use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{ClaimStoreError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "claim-store.yaml";
pub const CONFIG_ENV_VAR: &str = "CLAIM_STORE_CONFIG";

fn default_file_lock_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_stale_file_age() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

fn default_max_parallel_files() -> usize {
    4
}

/// Directories and timeouts driving the collector.
///
/// Read from YAML; durations accept humantime strings such as `30m` or `12h`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    pub check_in_directories: BTreeSet<PathBuf>,
    pub check_out_directory: PathBuf,
    /// Age after which an outstanding lock is presumed abandoned.
    #[serde(default = "default_file_lock_timeout", with = "humantime_serde")]
    pub file_lock_timeout: Duration,
    /// Delay between the end of one cycle and the start of the next.
    #[serde(default = "default_polling_interval", with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Files older than this are reported as stuck, whatever their lock state.
    #[serde(default = "default_stale_file_age", with = "humantime_serde")]
    pub stale_file_age: Duration,
    #[serde(default = "default_max_parallel_files")]
    pub max_parallel_files: usize,
}

impl AgentConfig {
    pub fn new(
        check_in_directories: impl IntoIterator<Item = PathBuf>,
        check_out_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            check_in_directories: check_in_directories.into_iter().collect(),
            check_out_directory: check_out_directory.into(),
            file_lock_timeout: default_file_lock_timeout(),
            polling_interval: default_polling_interval(),
            stale_file_age: default_stale_file_age(),
            max_parallel_files: default_max_parallel_files(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_in_directories.is_empty() {
            return Err(ClaimStoreError::InvalidConfig(
                "at least one check-in directory is required".into(),
            ));
        }
        if self.check_in_directories.contains(&self.check_out_directory) {
            return Err(ClaimStoreError::InvalidConfig(format!(
                "check-out directory {} is also listed as a check-in directory",
                self.check_out_directory.display()
            )));
        }
        for (name, value) in [
            ("file_lock_timeout", self.file_lock_timeout),
            ("polling_interval", self.polling_interval),
            ("stale_file_age", self.stale_file_age),
        ] {
            if value.is_zero() {
                return Err(ClaimStoreError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
            if TimeDelta::from_std(value).is_err() {
                return Err(ClaimStoreError::InvalidConfig(format!(
                    "{name} is out of range"
                )));
            }
        }
        if self.max_parallel_files == 0 {
            return Err(ClaimStoreError::InvalidConfig(
                "max_parallel_files must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> TimeDelta {
        TimeDelta::from_std(self.file_lock_timeout).unwrap_or(TimeDelta::MAX)
    }

    pub fn stale_age(&self) -> TimeDelta {
        TimeDelta::from_std(self.stale_file_age).unwrap_or(TimeDelta::MAX)
    }

    /// Anchor relative directories at `base` (the config file's directory).
    fn resolve_relative(&mut self, base: &Path) {
        self.check_in_directories = std::mem::take(&mut self.check_in_directories)
            .into_iter()
            .map(|dir| anchor(base, dir))
            .collect();
        let out = std::mem::take(&mut self.check_out_directory);
        self.check_out_directory = anchor(base, out);
    }
}

fn anchor(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Where the collector obtains its configuration on every cycle.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<AgentConfig>;

    fn describe(&self) -> String;
}

/// A fixed configuration, mostly for tests and embedding hosts.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(pub AgentConfig);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<AgentConfig> {
        self.0.validate()?;
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static configuration".into()
    }
}

/// A YAML file re-read on every load, so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<AgentConfig> {
        if !self.path.exists() {
            return Err(ClaimStoreError::ConfigNotFound(
                self.path.display().to_string(),
            ));
        }
        let data = fs::read_to_string(&self.path)?;
        let mut config: AgentConfig = serde_yaml::from_str(&data)?;
        let base = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        config.resolve_relative(base);
        config.validate()?;
        Ok(config)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// `--config`, then `CLAIM_STORE_CONFIG`, then `./claim-store.yaml`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Write a starter configuration. Refuses to overwrite unless `force`.
pub fn write_default(path: &Path, force: bool) -> Result<AgentConfig> {
    if path.exists() && !force {
        return Err(ClaimStoreError::InvalidConfig(format!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        )));
    }
    let config = AgentConfig::new([PathBuf::from("check-in")], "check-out");
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(&config)?)?;
    Ok(config)
}
