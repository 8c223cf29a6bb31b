use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};

/// Run exactly one collection cycle and print its report.
pub async fn run(config_path: &Path, agent: &str, format: Format) -> Result<()> {
    let collector = super::file_backed_collector(config_path, agent)?;
    let report = collector.collect_once().await?;
    output::print_report(&report, format)
}
