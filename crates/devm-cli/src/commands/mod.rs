//! CLI command implementations

mod machine;
mod manage;

use anyhow::{Context, Result};
use devm_config::{GlobalConfig, MachineConfig};
use devm_core::{Machine, MachineSpec};
use devm_provider::{create_engine, ContainerId};
use std::path::Path;
use tokio::sync::mpsc;

pub use machine::*;
pub use manage::*;

/// Read the machine definition, or an anonymous non-dev machine without one
fn load_machine_config(path: Option<&Path>) -> Result<MachineConfig> {
    match path {
        Some(path) => Ok(MachineConfig::load_from(path)?),
        None => Ok(MachineConfig::default()),
    }
}

/// Connect to the engine and build a machine around an existing container
async fn open_machine(
    config: &GlobalConfig,
    container: &str,
    machine: Option<&Path>,
    output: Option<mpsc::UnboundedSender<String>>,
) -> Result<Machine> {
    let machine_config = load_machine_config(machine)?;
    let engine = create_engine(config).await?;

    let info = engine
        .inspect(&ContainerId::new(container))
        .await
        .with_context(|| format!("Failed to inspect container '{}'", container))?;

    let mut spec = MachineSpec::from_config(config, &machine_config, info);
    if let Some(output) = output {
        spec = spec.with_output(output);
    }
    Ok(Machine::with_docker_processes(spec, engine))
}

/// Print lines from `rx` until every sender is gone
fn spawn_printer(
    mut rx: mpsc::UnboundedReceiver<String>,
    to_stderr: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if to_stderr {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
    })
}
