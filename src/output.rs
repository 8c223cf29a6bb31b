use chrono::TimeDelta;
use clap::ValueEnum;
use colored::Colorize;

use crate::collector::CycleReport;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_report(report: &CycleReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            println!(
                "{} by {}",
                "collection cycle".cyan().bold(),
                report.agent.bold()
            );
            println!(
                "  {} {} discovered, {} eligible, {} skipped",
                "files:".dimmed(),
                report.discovered,
                report.eligible,
                report.skipped
            );
            println!(
                "  {} {} claimed, {} tracked",
                "collected:".dimmed(),
                report.collected_claimed.to_string().green(),
                report.collected_tracked.to_string().green()
            );
            if report.reclaimed > 0 {
                println!("  {} {}", "reclaimed:".dimmed(), report.reclaimed.to_string().yellow());
            }
            if report.contended > 0 {
                println!("  {} {}", "contended:".dimmed(), report.contended);
            }
            if report.failed + report.unclassified + report.unreadable_directories > 0 {
                println!(
                    "  {} {} failed, {} unclassified, {} unreadable directories",
                    "problems:".dimmed(),
                    report.failed.to_string().red(),
                    report.unclassified.to_string().red(),
                    report.unreadable_directories.to_string().red()
                );
            }
            if report.orphans_swept > 0 {
                println!("  {} {}", "swept:".dimmed(), report.orphans_swept);
            }
            for outcome in &report.collected {
                println!(
                    "  {} {} -> {}",
                    format!("[{}]", outcome.mode).dimmed(),
                    outcome.path.display(),
                    outcome.destination.display()
                );
            }
        }
        Format::Minimal => println!(
            "collected={} skipped={} contended={} failed={} unclassified={}",
            report.collected_total(),
            report.skipped,
            report.contended,
            report.failed,
            report.unclassified
        ),
    }
    Ok(())
}

/// Compact human duration: `45s`, `12m`, `3h05m`, `2d04h`.
pub fn format_age(age: TimeDelta) -> String {
    let secs = age.num_seconds();
    let sign = if secs < 0 { "-" } else { "" };
    let secs = secs.unsigned_abs();
    match secs {
        s if s < 60 => format!("{sign}{s}s"),
        s if s < 3600 => format!("{sign}{}m", s / 60),
        s if s < 86_400 => format!("{sign}{}h{:02}m", s / 3600, (s % 3600) / 60),
        s => format!("{sign}{}d{:02}h", s / 86_400, (s % 86_400) / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_age_picks_largest_units() {
        assert_eq!(format_age(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_age(TimeDelta::minutes(12)), "12m");
        assert_eq!(format_age(TimeDelta::minutes(185)), "3h05m");
        assert_eq!(format_age(TimeDelta::hours(52)), "2d04h");
        assert_eq!(format_age(TimeDelta::seconds(-90)), "-1m");
    }
}
