//! Commands that operate on a machine

use super::{open_machine, spawn_printer};
use anyhow::{anyhow, Result};
use devm_config::GlobalConfig;
use devm_core::{Command, SnapshotError};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Print the machine's exposed servers as JSON
pub async fn servers(config: &GlobalConfig, container: &str, machine: Option<&Path>) -> Result<()> {
    let machine = open_machine(config, container, machine, None).await?;

    // sorted for stable output
    let servers: BTreeMap<_, _> = machine.servers().into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&servers)?);

    machine.destroy();
    Ok(())
}

/// Save the machine to a snapshot and print where it went
pub async fn snapshot(
    mut config: GlobalConfig,
    container: &str,
    machine: Option<&Path>,
    push: bool,
) -> Result<()> {
    if push {
        config.snapshot.use_registry = true;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(rx, true);
    let machine = open_machine(&config, container, machine, Some(tx)).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling snapshot...");
            on_interrupt.cancel();
        }
    });

    let result = machine.save_to_snapshot(&cancel).await;
    interrupt.abort();

    // the publisher holds the progress sender
    drop(machine);
    let _ = printer.await;

    match result {
        Ok(source) => {
            println!("{}", serde_json::to_string_pretty(&source)?);
            Ok(())
        }
        Err(e) => {
            if let Some(image) = e.orphaned_image() {
                eprintln!("Local image {} was left behind", image);
            }
            match e {
                SnapshotError::Interrupted { .. } => Err(anyhow!("Snapshot cancelled")),
                other => Err(other.into()),
            }
        }
    }
}

/// Run a command as a tracked process and stream its output
pub async fn exec(config: &GlobalConfig, container: &str, cmd: Vec<String>) -> Result<()> {
    let name = cmd
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("No command given"))?;
    let command = Command::new(name, shell_words::join(&cmd));

    let machine = open_machine(config, container, None, None).await?;
    let process = machine.create_process(&command, None).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(rx, false);
    process.start(Some(tx)).await?;

    tokio::select! {
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, killing process {}...", process.pid());
            if let Err(e) = process.kill().await {
                tracing::warn!("Failed to kill process {}: {}", process.pid(), e);
            }
        }
    }

    machine.destroy();
    Ok(())
}
