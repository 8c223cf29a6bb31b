use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::classify::ClaimFileClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::{AgentConfig, ConfigSource, FileConfigSource};
use crate::error::Result;
use crate::filter::{CollectibilityFilter, Eligibility};
use crate::model::HandlingMode;
use crate::output::{Format, format_age};
use crate::store::checkin::CheckInDirectory;
use crate::store::lease::{FsLeaseStore, LeaseStore};

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub path: PathBuf,
    pub mode: HandlingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_age_secs: Option<i64>,
    pub file_age_secs: i64,
    pub eligibility: Eligibility,
    pub troublesome_lock: bool,
    pub stale_file: bool,
    pub released: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub checked_at: DateTime<Utc>,
    pub files: Vec<FileStatus>,
    pub problems: Vec<Problem>,
}

/// Inspect every check-in directory without changing anything.
pub fn collect_status(
    config: &AgentConfig,
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
) -> StatusReport {
    let classifier = ClaimFileClassifier::new(leases);
    let filter = CollectibilityFilter::new(config.lock_timeout(), clock.clone())
        .with_stale_file_age(config.stale_age());
    let now = clock.now();
    let mut report = StatusReport {
        checked_at: now,
        files: Vec::new(),
        problems: Vec::new(),
    };

    for dir in &config.check_in_directories {
        let payloads = match CheckInDirectory::open(dir).list_payloads() {
            Ok(payloads) => payloads,
            Err(e) => {
                report.problems.push(Problem {
                    path: dir.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        for path in payloads {
            let file = match classifier.classify(&path) {
                Ok(file) => file,
                Err(e) => {
                    report.problems.push(Problem {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let assessment = filter.assess(&file, now);
            report.files.push(FileStatus {
                mode: file.mode,
                holder: file.lease.as_ref().map(|l| l.holder.clone()),
                lock_age_secs: assessment.lock_age.map(|a| a.num_seconds()),
                file_age_secs: assessment.file_age.num_seconds(),
                eligibility: assessment.eligibility,
                troublesome_lock: assessment.troublesome_lock,
                stale_file: assessment.stale_file,
                released: file.released,
                path: file.path,
            });
        }
    }
    report
}

pub fn run(config_path: &Path, format: Format) -> Result<()> {
    let config = FileConfigSource::new(config_path).load()?;
    let report = collect_status(&config, Arc::new(FsLeaseStore::new()), Arc::new(SystemClock));
    print_status(&report, format)
}

fn print_status(report: &StatusReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            if report.files.is_empty() && report.problems.is_empty() {
                println!("{}", "No payload files waiting.".dimmed());
            }
            for file in &report.files {
                let eligibility = match file.eligibility {
                    Eligibility::Held => file.eligibility.to_string().yellow(),
                    Eligibility::Abandoned => file.eligibility.to_string().red(),
                    Eligibility::Unlocked => file.eligibility.to_string().green(),
                };
                println!(
                    "{} {} {}",
                    format!("[{}]", file.mode).cyan().bold(),
                    file.path.display(),
                    eligibility
                );
                println!(
                    "  {} {}",
                    "age:".dimmed(),
                    format_age(chrono::TimeDelta::seconds(file.file_age_secs))
                );
                if let (Some(holder), Some(age)) = (&file.holder, file.lock_age_secs) {
                    println!(
                        "  {} {} for {}",
                        "lock:".dimmed(),
                        holder,
                        format_age(chrono::TimeDelta::seconds(age))
                    );
                }
                if file.troublesome_lock {
                    println!("  {}", "troublesome lock".yellow().bold());
                }
                if file.stale_file {
                    println!("  {}", "stale: not collected in time".red().bold());
                }
                if file.released {
                    println!("  {}", "release interrupted".yellow());
                }
            }
            for problem in &report.problems {
                println!("{} {}: {}", "error".red().bold(), problem.path.display(), problem.error);
            }
        }
        Format::Minimal => {
            println!("{:8} {:10} {:>8} {:>8} PATH", "MODE", "STATE", "AGE", "LOCK");
            println!("{}", "-".repeat(60));
            for file in &report.files {
                let lock = file
                    .lock_age_secs
                    .map(|s| format_age(chrono::TimeDelta::seconds(s)))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:8} {:10} {:>8} {:>8} {}",
                    file.mode.to_string(),
                    file.eligibility.to_string(),
                    format_age(chrono::TimeDelta::seconds(file.file_age_secs)),
                    lock,
                    file.path.display()
                );
            }
            for problem in &report.problems {
                println!("{:8} {:10} {:>8} {:>8} {}", "?", "error", "-", "-", problem.path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Lease;
    use crate::store::lease::MemoryLeaseStore;
    use chrono::TimeDelta;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn status_reports_without_touching_files() {
        let root = tempdir().unwrap();
        let check_in = root.path().join("in");
        fs::create_dir_all(&check_in).unwrap();
        fs::write(check_in.join("a.claimed"), "A").unwrap();
        fs::write(check_in.join("b.tracked"), "B").unwrap();
        fs::write(check_in.join("c.weird"), "C").unwrap();

        let now = Utc::now();
        let leases = Arc::new(MemoryLeaseStore::new());
        leases.insert(check_in.join("b.tracked"), Lease::new("agent-z", now - TimeDelta::hours(2)));
        let config = AgentConfig::new([check_in.clone()], root.path().join("out"));

        let report = collect_status(&config, leases, Arc::new(ManualClock::new(now)));

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.problems.len(), 1);
        let tracked = report.files.iter().find(|f| f.mode == HandlingMode::Tracked).unwrap();
        assert_eq!(tracked.eligibility, Eligibility::Abandoned);
        assert!(tracked.troublesome_lock);
        assert_eq!(tracked.holder.as_deref(), Some("agent-z"));
        assert!(check_in.join("a.claimed").exists());
        assert!(!root.path().join("out").exists());
    }
}
