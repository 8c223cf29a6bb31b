use std::fs;
use std::path::Path;

use serde_json::json;

use crate::config::{self, ConfigSource, FileConfigSource};
use crate::error::Result;
use crate::output::Format;

/// Write a starter configuration and create the directories it names.
pub fn run(config_path: &Path, force: bool, format: Format) -> Result<()> {
    config::write_default(config_path, force)?;
    let config = FileConfigSource::new(config_path).load()?;

    for dir in &config.check_in_directories {
        fs::create_dir_all(dir)?;
    }
    fs::create_dir_all(&config.check_out_directory)?;

    match format {
        Format::Json => println!(
            "{}",
            json!({
                "config": config_path.display().to_string(),
                "check_in_directories": config.check_in_directories,
                "check_out_directory": config.check_out_directory,
            })
        ),
        Format::Pretty | Format::Minimal => {
            eprintln!("Wrote {}", config_path.display());
        }
    }
    Ok(())
}
