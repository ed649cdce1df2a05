mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use backupd::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// backupd - Scheduled backups driven by shell scripts
#[derive(Parser, Debug)]
#[command(version = backupd::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Data directory holding the job file (overrides config file)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Show upcoming fire times for the stored jobs
    NextRuns {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Data directory holding the job file (overrides config file)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Fire times to show per job
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },

    /// List the built-in job presets
    Presets,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, data_dir } => {
            commands::serve::run(&config, data_dir.as_deref()).await
        }
        Commands::NextRuns {
            config,
            data_dir,
            count,
        } => commands::next_runs::run(&config, data_dir.as_deref(), count).await,
        Commands::Presets => commands::presets::run(),
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
