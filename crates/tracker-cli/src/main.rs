mod commands;
mod frame_source;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tracker", about = "Offline video object tracker")]
#[command(version)]
struct Cli {
    /// Enable verbose output (also settable via TRACKER_VERBOSE=1)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a PCA patch projector from sampled frames
    Projector(commands::projector::ProjectorArgs),
    /// Build per-frame k-d tree indices over a directory of frames
    Kdtree(commands::kdtree::KdtreeArgs),
}

fn verbose_requested(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("TRACKER_VERBOSE")
        .map(|v| v != "0" && !v.is_empty())
        .unwrap_or(false)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if verbose_requested(cli.verbose) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Projector(args) => commands::projector::run(args, verbose_requested(cli.verbose)),
        Commands::Kdtree(args) => commands::kdtree::run(args, verbose_requested(cli.verbose)),
    }
}
