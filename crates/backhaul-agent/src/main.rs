//! backhaul host metrics agent.
//!
//! Collects host metrics on a fixed cadence and serves them to the metrics
//! broker over a reverse TLS connection the agent dials itself.
//!
//! # Quick Start
//!
//! ```bash
//! # Show the effective configuration
//! backhaul config
//!
//! # Collect once and print the metrics
//! backhaul collect cpu
//!
//! # Run the agent (default command)
//! backhaul --config /etc/backhaul/backhaul.toml
//! ```

mod commands;
mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use backhaul_config::{BackhaulConfig, ConfigLoader};
use clap::{Parser, Subcommand};

/// backhaul - host metrics over a reverse TLS connection.
#[derive(Parser)]
#[command(name = "backhaul")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Where configuration is loaded from.
#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration file layered above backhaul.toml and backhaul.local.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for backhaul.toml and backhaul.local.toml.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<BackhaulConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(dir) = &self.project_dir {
            loader = loader.with_project_dir(dir);
        }
        if let Some(file) = &self.config {
            loader = loader.with_file(file);
        }
        loader.load()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted (the default).
    Run,

    /// Print the effective configuration as TOML.
    Config,

    /// Run every enabled collector once and print the metrics as JSON.
    Collect {
        /// Collector or metric to print (`cpu`, `cpu/used_pct`); everything when omitted.
        path: Option<String>,
    },

    /// Show version information.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let load = || -> Result<BackhaulConfig> {
        let config = cli.config.load()?;
        logging::init(&config.log);
        Ok(config)
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Run => commands::run::run(&cli.config, load()?),
        Commands::Config => commands::config::show(&load()?),
        Commands::Collect { path } => commands::collect::run(&load()?, path.as_deref()),
    }
}
