//! The machine facade

use crate::process::{Command, DockerProcessFactory, InstanceProcess, ProcessFactory};
use crate::registry::ProcessRegistry;
use crate::servers::{ExposedServer, ServerConfigTable};
use crate::snapshot::{MachineSource, SnapshotPublisher, SNAPSHOT_REPOSITORY_PREFIX};
use crate::stop_detector::{MachineEvent, StopDetector};
use crate::strategy::ServerEvaluationStrategy;
use crate::{CoreError, ProcessCreationError, Result, SnapshotError};
use devm_config::{GlobalConfig, MachineConfig, SnapshotConfig};
use devm_provider::{ContainerDetails, ContainerEngine, ContainerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Length of the container id prefix used in snapshot repository names
const SNAPSHOT_ID_LEN: usize = 12;

/// Facts about a machine that never change after it is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub container: ContainerId,
    pub image: String,
    /// Registry snapshots are pushed to
    pub registry: Option<String>,
    pub registry_namespace: Option<String>,
    pub internal_host: String,
}

impl MachineIdentity {
    /// Repository this machine's snapshots are saved to:
    /// `[<namespace>/]machine_snapshot_<container id prefix>`
    pub fn snapshot_repository(&self) -> String {
        let id: String = self
            .container
            .0
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .take(SNAPSHOT_ID_LEN)
            .collect();
        let name = format!("{}{}", SNAPSHOT_REPOSITORY_PREFIX, id);

        match self.registry_namespace.as_deref().map(|ns| ns.trim_matches('/')) {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
            _ => name,
        }
    }
}

/// Everything needed to construct a [`Machine`]
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub name: Option<String>,
    pub dev: bool,
    pub identity: MachineIdentity,
    pub servers: ServerConfigTable,
    pub strategy: ServerEvaluationStrategy,
    pub snapshot: SnapshotConfig,
    pub stop_poll_interval: Duration,
    pub runtime_info: ContainerDetails,
    /// Receives snapshot progress lines
    pub output: Option<mpsc::UnboundedSender<String>>,
}

impl MachineSpec {
    /// Build a spec for the container described by `runtime_info`
    pub fn from_config(
        global: &GlobalConfig,
        machine: &MachineConfig,
        runtime_info: ContainerDetails,
    ) -> Self {
        let servers = ServerConfigTable::merge(
            &machine.servers,
            &global.servers.machine,
            &global.servers.dev_machine,
            machine.dev,
        );

        Self {
            name: machine.name.clone(),
            dev: machine.dev,
            identity: MachineIdentity {
                container: runtime_info.id.clone(),
                image: runtime_info.image.clone(),
                registry: global.snapshot.registry_host().map(str::to_string),
                registry_namespace: global.snapshot.namespace.clone(),
                internal_host: global.servers.internal_host.clone(),
            },
            servers,
            strategy: ServerEvaluationStrategy::from_config(&global.servers),
            snapshot: global.snapshot.clone(),
            stop_poll_interval: global.processes.stop_poll_interval(),
            runtime_info,
            output: None,
        }
    }

    pub fn with_output(mut self, output: mpsc::UnboundedSender<String>) -> Self {
        self.output = Some(output);
        self
    }
}

/// A running development machine backed by a container
pub struct Machine {
    name: Option<String>,
    dev: bool,
    identity: MachineIdentity,
    servers: ServerConfigTable,
    strategy: ServerEvaluationStrategy,
    runtime_info: RwLock<ContainerDetails>,
    engine: Arc<dyn ContainerEngine>,
    publisher: SnapshotPublisher,
    processes: ProcessRegistry,
    stop_poll_interval: Duration,
    stop_detector: Mutex<Option<StopDetector>>,
    destroyed: AtomicBool,
}

impl Machine {
    pub fn new(
        spec: MachineSpec,
        engine: Arc<dyn ContainerEngine>,
        factory: Arc<dyn ProcessFactory>,
    ) -> Self {
        let publisher = SnapshotPublisher::new(Arc::clone(&engine), &spec.snapshot, spec.output);
        let processes = ProcessRegistry::new(spec.identity.container.clone(), factory);

        tracing::debug!(
            "Machine {} created with {} declared server(s)",
            spec.identity.container.short(),
            spec.servers.len()
        );

        Self {
            name: spec.name,
            dev: spec.dev,
            identity: spec.identity,
            servers: spec.servers,
            strategy: spec.strategy,
            runtime_info: RwLock::new(spec.runtime_info),
            engine,
            publisher,
            processes,
            stop_poll_interval: spec.stop_poll_interval,
            stop_detector: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a machine whose processes run through `docker exec`
    pub fn with_docker_processes(spec: MachineSpec, engine: Arc<dyn ContainerEngine>) -> Self {
        let factory = Arc::new(DockerProcessFactory::new(Arc::clone(&engine)));
        Self::new(spec, engine, factory)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    pub fn identity(&self) -> &MachineIdentity {
        &self.identity
    }

    pub fn container(&self) -> &ContainerId {
        &self.identity.container
    }

    pub fn server_config(&self) -> &ServerConfigTable {
        &self.servers
    }

    /// Servers of this machine, evaluated against the current runtime info
    pub fn servers(&self) -> HashMap<String, ExposedServer> {
        let info = self.runtime_info.read().unwrap_or_else(|e| e.into_inner());
        self.strategy
            .resolve(&info, &self.identity.internal_host, &self.servers)
    }

    pub fn runtime_info(&self) -> ContainerDetails {
        self.runtime_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the runtime info servers are evaluated against
    pub fn update_runtime_info(&self, info: ContainerDetails) {
        *self.runtime_info.write().unwrap_or_else(|e| e.into_inner()) = info;
    }

    /// Re-inspect the container and keep the result
    pub async fn refresh_runtime_info(&self) -> Result<()> {
        let info = self.engine.inspect(&self.identity.container).await?;
        self.update_runtime_info(info);
        Ok(())
    }

    /// Save the machine to a snapshot, see [`SnapshotPublisher::publish`]
    pub async fn save_to_snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<MachineSource, SnapshotError> {
        self.publisher.publish(&self.identity, cancel).await
    }

    /// Create a process for `command` in this machine.
    ///
    /// The process is tracked but not started.
    pub async fn create_process(
        &self,
        command: &Command,
        output_channel: Option<&str>,
    ) -> std::result::Result<Arc<dyn InstanceProcess>, ProcessCreationError> {
        if self.is_destroyed() {
            return Err(ProcessCreationError::Destroyed(
                self.identity.container.to_string(),
            ));
        }
        self.processes.create(command, output_channel).await
    }

    pub fn process(&self, pid: u64) -> Result<Arc<dyn InstanceProcess>> {
        self.processes.get(pid).ok_or(CoreError::ProcessNotFound(pid))
    }

    pub fn processes(&self) -> Vec<Arc<dyn InstanceProcess>> {
        self.processes.list()
    }

    /// Kill a tracked process and stop tracking it
    pub async fn kill_process(&self, pid: u64) -> Result<()> {
        let process = self.process(pid)?;
        process.kill().await?;
        self.processes.remove(pid);
        Ok(())
    }

    /// Stop tracking processes that have exited
    pub async fn cleanup_dead_processes(&self) -> Vec<u64> {
        self.processes.cleanup_dead().await
    }

    /// Watch the container and send [`MachineEvent::Stopped`] once it stops.
    /// Does nothing when detection is already running or the machine is
    /// destroyed.
    pub fn start_stop_detection(&self, events: mpsc::UnboundedSender<MachineEvent>) {
        if self.is_destroyed() {
            return;
        }
        let mut detector = self.stop_detector.lock().unwrap_or_else(|e| e.into_inner());
        if detector.as_ref().is_some_and(|d| !d.is_finished()) {
            return;
        }
        *detector = Some(StopDetector::spawn(
            Arc::clone(&self.engine),
            self.identity.container.clone(),
            self.stop_poll_interval,
            events,
        ));
    }

    /// Release what the machine holds: stop detection and tracked processes.
    /// The container itself is left alone. Safe to call more than once.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(detector) = self
            .stop_detector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            detector.abort();
        }
        self.processes.close();
        tracing::info!("Machine {} destroyed", self.identity.container.short());
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
