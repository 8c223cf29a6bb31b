use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::claim_file::ClaimFile;
use crate::classify::ClaimFileClassifier;
use crate::clock::Clock;
use crate::config::{AgentConfig, ConfigSource};
use crate::error::{ClaimStoreError, Result};
use crate::filter::CollectibilityFilter;
use crate::handler::{CollectOutcome, HandlerContext, MessageBodyHandler};
use crate::model::HandlingMode;
use crate::scheduler::CycleRunner;
use crate::store::checkin::CheckInDirectory;
use crate::store::checkout;
use crate::store::lease::LeaseStore;

/// Summary of one collection cycle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: usize,
    pub unclassified: usize,
    pub eligible: usize,
    pub skipped: usize,
    pub collected_claimed: usize,
    pub collected_tracked: usize,
    pub contended: usize,
    pub failed: usize,
    pub reclaimed: usize,
    pub orphans_swept: usize,
    pub unreadable_directories: usize,
    pub collected: Vec<CollectOutcome>,
}

impl CycleReport {
    fn new(agent: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            agent: agent.to_string(),
            started_at,
            finished_at: started_at,
            discovered: 0,
            unclassified: 0,
            eligible: 0,
            skipped: 0,
            collected_claimed: 0,
            collected_tracked: 0,
            contended: 0,
            failed: 0,
            reclaimed: 0,
            orphans_swept: 0,
            unreadable_directories: 0,
            collected: Vec::new(),
        }
    }

    pub fn collected_total(&self) -> usize {
        self.collected_claimed + self.collected_tracked
    }

    fn record(&mut self, outcome: CollectOutcome) {
        match outcome.mode {
            HandlingMode::Claimed => self.collected_claimed += 1,
            HandlingMode::Tracked => self.collected_tracked += 1,
        }
        if outcome.reclaimed_from.is_some() {
            self.reclaimed += 1;
        }
        self.collected.push(outcome);
    }
}

/// Files found across all check-in directories, before filtering.
struct Discovery {
    files: Vec<ClaimFile>,
    unclassified: usize,
    orphans_swept: usize,
    unreadable_directories: usize,
}

fn discover(
    config: &AgentConfig,
    leases: Arc<dyn LeaseStore>,
    now: DateTime<Utc>,
) -> Discovery {
    let classifier = ClaimFileClassifier::new(leases.clone());
    let mut discovery = Discovery {
        files: Vec::new(),
        unclassified: 0,
        orphans_swept: 0,
        unreadable_directories: 0,
    };

    for dir in &config.check_in_directories {
        let check_in = CheckInDirectory::open(dir);
        let payloads = match check_in.list_payloads() {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(directory = %dir.display(), error = %e, "cannot enumerate check-in directory");
                discovery.unreadable_directories += 1;
                continue;
            }
        };

        for path in payloads {
            match classifier.classify(&path) {
                Ok(file) => discovery.files.push(file),
                Err(e @ ClaimStoreError::UnsupportedHandlingMode { .. }) => {
                    error!(path = %path.display(), error = %e, "cannot classify payload file");
                    discovery.unclassified += 1;
                }
                // Typically collected and released by another agent since listing.
                Err(ClaimStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "payload vanished during discovery");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot inspect payload file");
                    discovery.unclassified += 1;
                }
            }
        }

        match leases.prune(dir, now, config.lock_timeout()) {
            Ok(n) => discovery.orphans_swept += n,
            Err(e) => debug!(directory = %dir.display(), error = %e, "lock marker sweep skipped"),
        }
        match check_in.sweep_release_markers() {
            Ok(n) => discovery.orphans_swept += n,
            Err(e) => debug!(directory = %dir.display(), error = %e, "release marker sweep skipped"),
        }
    }

    discovery
}

/// Runs collection cycles: discover, classify, filter, hand each eligible
/// file to its handler.
pub struct Collector {
    config: Arc<dyn ConfigSource>,
    last_good: Mutex<AgentConfig>,
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    agent: String,
}

impl Collector {
    /// The initial configuration load must succeed; later reloads may fail
    /// and fall back to the last valid configuration.
    pub fn new(
        config: Arc<dyn ConfigSource>,
        leases: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        agent: impl Into<String>,
    ) -> Result<Self> {
        let initial = config.load()?;
        Ok(Self {
            config,
            last_good: Mutex::new(initial),
            leases,
            clock,
            agent: agent.into(),
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn current_config(&self) -> AgentConfig {
        match self.config.load() {
            Ok(config) => {
                *self.last_good.lock() = config.clone();
                config
            }
            Err(e) => {
                warn!(
                    source = %self.config.describe(),
                    error = %e,
                    "configuration reload failed, keeping previous configuration"
                );
                self.last_good.lock().clone()
            }
        }
    }

    /// Reload configuration and run exactly one cycle.
    pub async fn collect_once(&self) -> Result<CycleReport> {
        let config = self.current_config();
        self.collect_with(&config).await
    }

    /// One cycle with the given configuration. Per-file failures are counted
    /// and logged; only cycle-wide failures are returned as errors.
    pub async fn collect_with(&self, config: &AgentConfig) -> Result<CycleReport> {
        let mut report = CycleReport::new(&self.agent, self.clock.now());

        let check_out = config.check_out_directory.clone();
        blocking(move || checkout::ensure_dir(&check_out)).await??;

        let discovery = {
            let config = config.clone();
            let leases = self.leases.clone();
            let now = self.clock.now();
            blocking(move || discover(&config, leases, now)).await?
        };
        report.discovered = discovery.files.len();
        report.unclassified = discovery.unclassified;
        report.orphans_swept = discovery.orphans_swept;
        report.unreadable_directories = discovery.unreadable_directories;

        let filter = CollectibilityFilter::new(config.lock_timeout(), self.clock.clone())
            .with_stale_file_age(config.stale_age());
        let mut handlers = Vec::new();
        for file in filter.filter(discovery.files) {
            report.eligible += 1;
            match MessageBodyHandler::new(file) {
                Ok(handler) => handlers.push(handler),
                Err(e) => {
                    error!(error = %e, "refusing to collect file");
                    report.failed += 1;
                }
            }
        }
        report.skipped = report.discovered - report.eligible;

        let results = stream::iter(handlers)
            .map(|handler| self.dispatch(handler, config))
            .buffer_unordered(config.max_parallel_files)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            let (path, outcome) = result?;
            match outcome {
                Ok(outcome) => {
                    debug!(
                        path = %outcome.path.display(),
                        mode = %outcome.mode,
                        destination = %outcome.destination.display(),
                        "collected"
                    );
                    report.record(outcome);
                }
                Err(e @ (ClaimStoreError::LeaseHeld { .. } | ClaimStoreError::Locked(_))) => {
                    debug!(path = %path.display(), error = %e, "lost race for file, will retry next cycle");
                    report.contended += 1;
                }
                // Another agent finished the file between discovery and our lock.
                Err(ClaimStoreError::Io(e))
                    if e.kind() == std::io::ErrorKind::NotFound && !path.exists() =>
                {
                    debug!(path = %path.display(), "file collected by another agent first");
                    report.contended += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(path = %path.display(), error = %e, "collection failed, will retry next cycle");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "collection failed");
                    report.failed += 1;
                }
            }
        }

        report.finished_at = self.clock.now();
        info!(
            agent = %self.agent,
            discovered = report.discovered,
            eligible = report.eligible,
            skipped = report.skipped,
            collected = report.collected_total(),
            contended = report.contended,
            failed = report.failed,
            unclassified = report.unclassified,
            reclaimed = report.reclaimed,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "collection cycle finished"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        handler: MessageBodyHandler,
        config: &AgentConfig,
    ) -> Result<(PathBuf, Result<CollectOutcome>)> {
        let leases = self.leases.clone();
        let clock = self.clock.clone();
        let holder = self.agent.clone();
        let destination = config.check_out_directory.clone();
        let lock_timeout: TimeDelta = config.lock_timeout();

        blocking(move || {
            let ctx = HandlerContext {
                leases: leases.as_ref(),
                holder: &holder,
                clock: clock.as_ref(),
                lock_timeout,
            };
            let path = handler.file().path.clone();
            let outcome = handler.collect(&ctx, &destination);
            (path, outcome)
        })
        .await
    }
}

/// Run blocking filesystem work off the async workers. A panic inside is a
/// bug, not a per-file condition, and surfaces as a cycle failure.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ClaimStoreError::TaskFailed(e.to_string()))
}

#[async_trait]
impl CycleRunner for Collector {
    async fn run_cycle(&self) -> Result<Duration> {
        let config = self.current_config();
        self.collect_with(&config).await?;
        Ok(config.polling_interval)
    }
}
