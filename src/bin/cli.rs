//! landsync CLI
//!
//! Local execution entry point. For AWS Lambda, use `landsync-lambda`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use landsync::{config, error::Result, pipeline, utils::log};
use tracing::{error, info};

/// Initiator recorded in crawl logs for manual runs.
const RUN_BY: &str = "DEVELOPER";

/// landsync - land open-data crawler and loader
#[derive(Parser, Debug)]
#[command(
    name = "landsync",
    version,
    about = "Incremental crawler and loader for land-use and land-feature revisions"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "LANDSYNC_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect revisions newer than the last crawl log
    Crawl,

    /// Load a crawl run into the database
    Load {
        /// Run timestamp to load (default: the latest run)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Run full pipeline: Crawl → Load
    Pipeline,

    /// Validate configuration
    Validate,
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config)?;
    config::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    log::init(&config.logging);

    info!(config = %cli.config.display(), env = %config.environment, "landsync starting");

    match cli.command {
        Command::Crawl => {
            let summary = pipeline::run_crawler(&config, RUN_BY).await?;
            info!(
                run = summary.run_id.timestamp(),
                zips = summary.totals.total(),
                logs = summary.logs.len(),
                "Crawl complete"
            );
        }

        Command::Load { run_id } => {
            if run_id.is_some() {
                config.store.crawler_log_id = run_id;
            }
            let summary = pipeline::run_loader(&config, RUN_BY).await?;
            info!(
                run = %summary.run_prefix,
                archives = summary.archives,
                rows = summary.rows,
                "Load complete"
            );
        }

        Command::Pipeline => {
            let summary = pipeline::run_pipeline(&config, RUN_BY).await?;
            info!(
                run = summary.crawl.run_id.timestamp(),
                zips = summary.crawl.totals.total(),
                rows = summary.load.map(|l| l.rows).unwrap_or_default(),
                "Pipeline complete"
            );
        }

        Command::Validate => {
            info!("Validating configuration...");

            if let Err(e) = config.validate() {
                error!(error = %e, "Config validation failed");
                return Err(e);
            }
            info!("Crawl configuration OK");

            match config.validate_for_load() {
                Ok(()) => info!("Load configuration OK"),
                Err(e) => error!(error = %e, "Load stage is not configured"),
            }
        }
    }

    Ok(())
}
