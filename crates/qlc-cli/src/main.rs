//! QLC CLI - train gridworld agents and inspect what they learned
//!
//! Configuration is layered: `qlc.toml`, then `QLC__SECTION__KEY` environment
//! variables, then command line flags.

#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::unused_async)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{config, train};

#[derive(Parser)]
#[command(name = "qlc")]
#[command(author, version, about = "Multi-agent Q-learning gridworld sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (overrides $QLC_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a training session and print its report
    Train(train::TrainArgs),
    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging level comes from the configuration, so load it first
    let loaded = config::load(cli.config.as_deref())?;

    let log_level = if cli.verbose {
        "debug"
    } else {
        loaded.config.logging.level.as_str()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("qlc={log_level},qlc_rl={log_level},qlc_core={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &loaded.source {
        Some(path) => tracing::info!("Loaded config from: {:?}", path),
        None => tracing::debug!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Train(args) => train::run(args, loaded.config).await,
        Commands::Config(cmd) => config::run(cmd, &loaded).await,
    }
}
