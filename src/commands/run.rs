use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::build_info;
use crate::error::Result;
use crate::scheduler::CollectionScheduler;

/// Run the agent until Ctrl-C or a fatal cycle failure.
pub async fn run(config_path: &Path, agent: &str) -> Result<()> {
    let collector = Arc::new(super::file_backed_collector(config_path, agent)?);
    let config = collector.current_config();
    info!(
        agent,
        version = %build_info::describe(),
        config = %config_path.display(),
        check_in_directories = config.check_in_directories.len(),
        check_out_directory = %config.check_out_directory.display(),
        lock_timeout = ?config.file_lock_timeout,
        polling_interval = ?config.polling_interval,
        "claim store agent starting"
    );

    let scheduler = CollectionScheduler::new(collector);
    scheduler.start()?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received, waiting for the current cycle to finish");
        }
        _ = scheduler.stopped() => {}
    }

    scheduler.shutdown().await
}
