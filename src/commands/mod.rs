pub mod collect;
pub mod init;
pub mod run;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::collector::Collector;
use crate::config::FileConfigSource;
use crate::error::Result;
use crate::store::lease::FsLeaseStore;

/// Collector wired to the YAML config file, sidecar leases and the system clock.
pub fn file_backed_collector(config_path: &Path, agent: &str) -> Result<Collector> {
    Collector::new(
        Arc::new(FileConfigSource::new(config_path)),
        Arc::new(FsLeaseStore::new()),
        Arc::new(SystemClock),
        agent,
    )
}
