//! devm - development machine runtime CLI

mod commands;

use clap::{Parser, Subcommand};
use devm_config::GlobalConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "devm")]
#[command(author, version, about = "Development Machine Runtime", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the servers a machine exposes
    Servers {
        /// Container name or ID
        container: String,
        /// Machine definition (JSON)
        #[arg(short, long)]
        machine: Option<PathBuf>,
    },

    /// Save a machine to a snapshot image
    Snapshot {
        /// Container name or ID
        container: String,
        /// Machine definition (JSON)
        #[arg(short, long)]
        machine: Option<PathBuf>,
        /// Push the snapshot to the configured registry
        #[arg(long)]
        push: bool,
    },

    /// Start a tracked process in a machine and stream its output
    Exec {
        /// Container name or ID
        container: String,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => GlobalConfig::config_path()?,
    };
    let config = GlobalConfig::load_from(&config_path)?;

    match cli.command {
        Commands::Servers { container, machine } => {
            commands::servers(&config, &container, machine.as_deref()).await?;
        }
        Commands::Snapshot {
            container,
            machine,
            push,
        } => {
            commands::snapshot(config, &container, machine.as_deref(), push).await?;
        }
        Commands::Exec { container, cmd } => {
            commands::exec(&config, &container, cmd).await?;
        }
        Commands::Config => {
            commands::config(&config, &config_path)?;
        }
    }

    Ok(())
}
