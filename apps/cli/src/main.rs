//! mediagrab CLI - Batch media downloader
//!
//! Takes a list of media URLs (arguments or a manifest file) and downloads
//! them with bounded concurrency, retries, and a live progress display.

mod commands;
mod manifest;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::RunArgs;
use mediagrab_core::Storage;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// mediagrab - Batch media downloader
#[derive(Parser)]
#[command(name = "mediagrab")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for settings and run reports
    #[arg(long, env = "MEDIAGRAB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a list of URLs
    Run {
        /// URLs to download
        urls: Vec<String>,

        /// File with one URL per line, or a JSON array of items
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Directory to download into
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Subfolder for items that do not name one
        #[arg(short, long)]
        subfolder: Option<String>,

        /// Max concurrent downloads
        #[arg(short = 'c', long)]
        max_concurrent: Option<usize>,

        /// Milliseconds a slot rests after each item
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Retries per item before it counts as failed
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,

        /// Speed limit in bytes/sec (0 for unlimited)
        #[arg(long)]
        speed_limit: Option<u64>,

        /// Replace existing files instead of picking a new name
        #[arg(long)]
        overwrite: bool,
    },

    /// List saved run reports
    Reports {
        /// Number of most recent reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "mediagrab", &mut std::io::stdout());
        return Ok(());
    }

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("mediagrab"))
            .unwrap_or_else(|| PathBuf::from(".mediagrab"))
    });
    let storage = Storage::new(data_dir).await?;

    match cli.command {
        Commands::Run {
            urls,
            manifest,
            output_dir,
            subfolder,
            max_concurrent,
            delay_ms,
            max_retries,
            speed_limit,
            overwrite,
        } => {
            let args = RunArgs {
                urls,
                manifest,
                output_dir,
                subfolder,
                max_concurrent,
                delay_ms,
                max_retries,
                speed_limit,
                overwrite,
            };
            commands::run_downloads(&storage, args, cli.output).await?
        }

        Commands::Reports { limit } => commands::list_reports(&storage, limit, cli.output).await?,

        Commands::Config { action } => commands::config_action(&storage, action, cli.output).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}
