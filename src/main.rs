use std::path::PathBuf;

use clap::{Parser, Subcommand};
use claim_store::output::Format;

#[derive(Parser)]
#[command(
    name = "claim-store",
    version,
    about = "Collects claim-check payload files into a central check-out directory"
)]
struct Cli {
    /// Configuration file (defaults to $CLAIM_STORE_CONFIG, then ./claim-store.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Agent name written into lease markers (defaults to $CLAIM_STORE_AGENT)
    #[arg(long, global = true)]
    agent: Option<String>,
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create its directories
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Run a single collection cycle and print its report
    Collect,
    /// Show waiting payload files, their locks and alerts
    Status,
    /// Run the polling agent until interrupted
    Run,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CLAIM_STORE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn run(cli: Cli, format: Format) -> claim_store::error::Result<()> {
    let config_path = claim_store::config::resolve_config_path(cli.config);

    match cli.command {
        Commands::Init { force } => claim_store::commands::init::run(&config_path, force, format),
        Commands::Status => claim_store::commands::status::run(&config_path, format),
        Commands::Collect => {
            let agent = claim_store::agent::identity(cli.agent);
            claim_store::commands::collect::run(&config_path, &agent, format).await
        }
        Commands::Run => {
            let agent = claim_store::agent::identity(cli.agent);
            claim_store::commands::run::run(&config_path, &agent).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    init_logging(cli.log_json);

    if let Err(e) = run(cli, format).await {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
