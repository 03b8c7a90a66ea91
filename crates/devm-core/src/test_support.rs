//! Test support utilities for devm-core
//!
//! Provides MockEngine and MockProcessFactory for unit testing machines
//! without requiring a real Docker engine.

use crate::machine::MachineIdentity;
use crate::process::{Command, InstanceProcess, ProcessFactory};
use async_trait::async_trait;
use devm_provider::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Inspect { id: String },
    Exec { id: String, cmd: Vec<String> },
    ExecWithProgress { id: String, cmd: Vec<String> },
    Commit { id: String, repo: String, tag: String },
    Push { image: String },
    RemoveImage { image: String, force: bool },
}

/// Configurable mock container engine for testing
pub struct MockEngine {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Result for inspect calls
    pub inspect_result: Arc<Mutex<Result<ContainerDetails>>>,
    /// Exit code and output for exec calls
    pub exec_exit_code: Arc<Mutex<i64>>,
    pub exec_output: Arc<Mutex<String>>,
    /// Error for exec calls (if Some, exec returns this error)
    pub exec_error: Arc<Mutex<Option<ProviderError>>>,
    /// Result for commit calls
    pub commit_result: Arc<Mutex<Result<ImageId>>>,
    /// Result for push calls
    pub push_result: Arc<Mutex<Result<Option<String>>>>,
    /// Progress sent before a push returns
    pub push_progress: Arc<Mutex<Vec<PushProgress>>>,
    /// How long a push takes
    pub push_delay: Arc<Mutex<Duration>>,
    /// Result for remove_image calls
    pub remove_image_result: Arc<Mutex<Result<()>>>,
}

impl MockEngine {
    /// Create a new mock engine with default success results
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            inspect_result: Arc::new(Mutex::new(Ok(mock_container_details(
                "mock_container_id",
                ContainerStatus::Running,
            )))),
            exec_exit_code: Arc::new(Mutex::new(0)),
            exec_output: Arc::new(Mutex::new(String::new())),
            exec_error: Arc::new(Mutex::new(None)),
            commit_result: Arc::new(Mutex::new(Ok(ImageId::new("sha256:mock_snapshot_id")))),
            push_result: Arc::new(Mutex::new(Ok(None))),
            push_progress: Arc::new(Mutex::new(vec![PushProgress {
                id: Some("mock_layer".to_string()),
                status: Some("Pushed".to_string()),
                ..Default::default()
            }])),
            push_delay: Arc::new(Mutex::new(Duration::ZERO)),
            remove_image_result: Arc::new(Mutex::new(Ok(()))),
        }
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    fn exec_result(&self) -> Result<ExecResult> {
        if let Some(err) = self.exec_error.lock().unwrap().as_ref() {
            return Err(clone_provider_error(err));
        }
        Ok(ExecResult {
            exit_code: *self.exec_exit_code.lock().unwrap(),
            output: self.exec_output.lock().unwrap().clone(),
        })
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to clone a Result<T> from an Arc<Mutex<Result<T>>>
fn clone_result<T: Clone>(r: &Arc<Mutex<Result<T>>>) -> Result<T> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
pub fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::ContainerNotFound(s) => ProviderError::ContainerNotFound(s.clone()),
        ProviderError::ImageNotFound(s) => ProviderError::ImageNotFound(s.clone()),
        ProviderError::CommitError(s) => ProviderError::CommitError(s.clone()),
        ProviderError::PushError(s) => ProviderError::PushError(s.clone()),
        ProviderError::ExecError(s) => ProviderError::ExecError(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
    }
}

/// Create a mock ContainerDetails
pub fn mock_container_details(id: &str, status: ContainerStatus) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: "mock_container".to_string(),
        image: "mock_image:latest".to_string(),
        image_id: "sha256:mock_image_id".to_string(),
        status,
        started_at: None,
        exit_code: None,
        labels: HashMap::new(),
        env: Vec::new(),
        mounts: Vec::new(),
        ports: Vec::new(),
        network_settings: NetworkSettings::default(),
    }
}

/// Create a port binding
pub fn port(container_port: u16, host_port: Option<u16>, protocol: &str) -> PortInfo {
    PortInfo {
        container_port,
        host_port,
        protocol: protocol.to_string(),
        host_ip: host_port.map(|_| "0.0.0.0".to_string()),
    }
}

/// Identity of a machine on container `c0ffee0000001234`
pub fn test_identity() -> MachineIdentity {
    MachineIdentity {
        container: ContainerId::new("c0ffee0000001234"),
        image: "mock_image:latest".to_string(),
        registry: Some("localhost:5000".to_string()),
        registry_namespace: None,
        internal_host: "devm-host".to_string(),
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        clone_result(&self.inspect_result)
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        self.record(MockCall::Exec {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
        });
        self.exec_result()
    }

    async fn exec_with_progress(
        &self,
        id: &ContainerId,
        config: &ExecConfig,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<ExecResult> {
        self.record(MockCall::ExecWithProgress {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
        });
        let result = self.exec_result()?;
        for line in result.output.lines() {
            let _ = progress.send(line.to_string());
        }
        Ok(result)
    }

    async fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId> {
        self.record(MockCall::Commit {
            id: id.0.clone(),
            repo: repo.to_string(),
            tag: tag.to_string(),
        });
        clone_result(&self.commit_result)
    }

    async fn push(
        &self,
        target: &PushTarget,
        progress: mpsc::UnboundedSender<PushProgress>,
    ) -> Result<Option<String>> {
        self.record(MockCall::Push {
            image: target.image_ref(),
        });
        let messages = self.push_progress.lock().unwrap().clone();
        for message in messages {
            let _ = progress.send(message);
        }
        let delay = *self.push_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        clone_result(&self.push_result)
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        self.record(MockCall::RemoveImage {
            image: image.to_string(),
            force,
        });
        clone_result(&self.remove_image_result)
    }
}

/// Process handle whose liveness is controlled by its factory
pub struct MockProcess {
    pid: u64,
    command: Command,
    output_channel: Option<String>,
    dead: Arc<Mutex<HashSet<u64>>>,
    killed: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl InstanceProcess for MockProcess {
    fn pid(&self) -> u64 {
        self.pid
    }

    fn command(&self) -> &Command {
        &self.command
    }

    fn output_channel(&self) -> Option<&str> {
        self.output_channel.as_deref()
    }

    async fn start(&self, output: Option<mpsc::UnboundedSender<String>>) -> Result<()> {
        if let Some(output) = output {
            let _ = output.send(format!("started {}", self.command.command_line));
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        !self.dead.lock().unwrap().contains(&self.pid)
    }

    async fn kill(&self) -> Result<()> {
        self.killed.lock().unwrap().push(self.pid);
        self.dead.lock().unwrap().insert(self.pid);
        Ok(())
    }
}

/// Process factory recording what it created
pub struct MockProcessFactory {
    /// Error for create calls (if Some, create returns this error)
    pub error: Arc<Mutex<Option<ProviderError>>>,
    /// How long a create call takes
    pub delay: Arc<Mutex<Duration>>,
    created: Arc<Mutex<Vec<(u64, String)>>>,
    dead: Arc<Mutex<HashSet<u64>>>,
    killed: Arc<Mutex<Vec<u64>>>,
}

impl MockProcessFactory {
    pub fn new() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            created: Arc::new(Mutex::new(Vec::new())),
            dead: Arc::new(Mutex::new(HashSet::new())),
            killed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ids and pid files of created processes, in creation order
    pub fn created(&self) -> Vec<(u64, String)> {
        self.created.lock().unwrap().clone()
    }

    /// Ids of killed processes
    pub fn killed(&self) -> Vec<u64> {
        self.killed.lock().unwrap().clone()
    }

    pub fn set_alive(&self, pid: u64, alive: bool) {
        let mut dead = self.dead.lock().unwrap();
        if alive {
            dead.remove(&pid);
        } else {
            dead.insert(pid);
        }
    }
}

impl Default for MockProcessFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessFactory for MockProcessFactory {
    async fn create(
        &self,
        command: &Command,
        _container: &ContainerId,
        output_channel: Option<&str>,
        pid_file: &str,
        pid: u64,
    ) -> Result<Arc<dyn InstanceProcess>> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.error.lock().unwrap().as_ref() {
            return Err(clone_provider_error(err));
        }
        self.created.lock().unwrap().push((pid, pid_file.to_string()));
        Ok(Arc::new(MockProcess {
            pid,
            command: command.clone(),
            output_channel: output_channel.map(str::to_string),
            dead: Arc::clone(&self.dead),
            killed: Arc::clone(&self.killed),
        }))
    }
}
