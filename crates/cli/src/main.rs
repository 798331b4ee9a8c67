//! keepsake CLI - ks command

use anyhow::Result;
use clap::{Parser, Subcommand};
use ks_cli::{cmd, config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// keepsake - Scheduled folder snapshots that skip when nothing changed
#[derive(Parser)]
#[command(name = "ks")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/keepsake/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example config
    Init,
    /// Run every enabled job on its schedule until interrupted
    Run {
        /// Run each enabled job once now and exit
        #[arg(long)]
        once: bool,
    },
    /// Show jobs, recorded actions, snapshots and next run times
    Status,
    /// Apply retention without taking a snapshot
    Prune {
        /// Job name (default: all enabled jobs)
        job: Option<String>,
    },
    /// Print a job's source fingerprint and whether the next run would copy
    Hash {
        /// Job name
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = config::resolve_path(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => cmd::init::run(&config_path).await,
        Commands::Run { once } => cmd::run::run(&config_path, once).await,
        Commands::Status => cmd::status::run(&config_path).await,
        Commands::Prune { job } => cmd::prune::run(&config_path, job).await,
        Commands::Hash { job } => cmd::hash::run(&config_path, &job).await,
    }
}

/// Logs go to stderr so command output on stdout stays scriptable
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
