//! Processes started inside a machine's container

use async_trait::async_trait;
use devm_provider::{ContainerEngine, ContainerId, ExecConfig, ProviderError, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Command a process is started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub command_line: String,
}

impl Command {
    pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_line: command_line.into(),
        }
    }
}

/// Where the in-container pid of process `pid` is recorded
pub fn pid_file_path(pid: u64) -> String {
    format!("/tmp/devm-exec-{}.pid", pid)
}

/// Handle to a process tracked by a machine
#[async_trait]
pub trait InstanceProcess: Send + Sync {
    /// Machine-local process id
    fn pid(&self) -> u64;

    fn command(&self) -> &Command;

    /// Name of the channel output is published under, if any
    fn output_channel(&self) -> Option<&str>;

    /// Start the process. Output lines are sent to `output` as they arrive.
    async fn start(&self, output: Option<mpsc::UnboundedSender<String>>) -> Result<()>;

    async fn is_alive(&self) -> bool;

    async fn kill(&self) -> Result<()>;
}

/// Creates process handles bound to a container
#[async_trait]
pub trait ProcessFactory: Send + Sync {
    async fn create(
        &self,
        command: &Command,
        container: &ContainerId,
        output_channel: Option<&str>,
        pid_file: &str,
        pid: u64,
    ) -> Result<Arc<dyn InstanceProcess>>;
}

/// Process run through `docker exec`
pub struct DockerProcess {
    engine: Arc<dyn ContainerEngine>,
    container: ContainerId,
    command: Command,
    output_channel: Option<String>,
    pid_file: String,
    pid: u64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DockerProcess {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        container: ContainerId,
        command: Command,
        output_channel: Option<String>,
        pid_file: String,
        pid: u64,
    ) -> Self {
        Self {
            engine,
            container,
            command,
            output_channel,
            pid_file,
            pid,
            task: Mutex::new(None),
        }
    }

    pub fn pid_file(&self) -> &str {
        &self.pid_file
    }

    /// Script that records the shell pid before replacing it with the command
    fn launch_script(&self) -> String {
        format!(
            "echo $$ > {}; exec {}",
            self.pid_file, self.command.command_line
        )
    }

    fn signal_script(&self, signal: &str) -> String {
        format!("kill -{} $(cat {}) 2>/dev/null", signal, self.pid_file)
    }
}

#[async_trait]
impl InstanceProcess for DockerProcess {
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
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return Err(ProviderError::ExecError(format!(
                "process {} already started",
                self.pid
            )));
        }

        tracing::debug!(
            "Starting process {} ({}) in {}",
            self.pid,
            self.command.name,
            self.container.short()
        );

        let engine = Arc::clone(&self.engine);
        let container = self.container.clone();
        let config = ExecConfig::shell(self.launch_script());
        let pid = self.pid;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        *task = Some(tokio::spawn(async move {
            let forward = async {
                while let Some(line) = rx.recv().await {
                    if let Some(output) = &output {
                        let _ = output.send(line);
                    }
                }
            };
            let run = engine.exec_with_progress(&container, &config, tx);
            let (result, _) = tokio::join!(run, forward);
            match result {
                Ok(r) => tracing::debug!("Process {} exited with code {}", pid, r.exit_code),
                Err(e) => tracing::warn!("Process {} failed: {}", pid, e),
            }
        }));

        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let config = ExecConfig::shell(self.signal_script("0"));
        match self.engine.exec(&self.container, &config).await {
            Ok(result) => result.exit_code == 0,
            Err(e) => {
                tracing::debug!("Liveness check of process {} failed: {}", self.pid, e);
                false
            }
        }
    }

    async fn kill(&self) -> Result<()> {
        let config = ExecConfig::shell(self.signal_script("9"));
        let result = self.engine.exec(&self.container, &config).await?;
        if result.exit_code != 0 {
            return Err(ProviderError::ExecError(format!(
                "failed to kill process {}: exit code {}",
                self.pid, result.exit_code
            )));
        }
        tracing::info!("Killed process {} ({})", self.pid, self.command.name);
        Ok(())
    }
}

impl Drop for DockerProcess {
    fn drop(&mut self) {
        // stop streaming, the in-container process is not affected
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Creates [`DockerProcess`] handles for live containers
pub struct DockerProcessFactory {
    engine: Arc<dyn ContainerEngine>,
}

impl DockerProcessFactory {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ProcessFactory for DockerProcessFactory {
    async fn create(
        &self,
        command: &Command,
        container: &ContainerId,
        output_channel: Option<&str>,
        pid_file: &str,
        pid: u64,
    ) -> Result<Arc<dyn InstanceProcess>> {
        let details = self.engine.inspect(container).await?;
        if !details.status.is_live() {
            return Err(ProviderError::ExecError(format!(
                "container {} is {}",
                container.short(),
                details.status
            )));
        }

        Ok(Arc::new(DockerProcess::new(
            Arc::clone(&self.engine),
            container.clone(),
            command.clone(),
            output_channel.map(str::to_string),
            pid_file.to_string(),
            pid,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_container_details, MockCall, MockEngine};
    use devm_provider::ContainerStatus;

    fn process(engine: Arc<MockEngine>) -> DockerProcess {
        DockerProcess::new(
            engine,
            ContainerId::new("c0ffee"),
            Command::new("build", "mvn clean install"),
            Some("process:output:7".to_string()),
            pid_file_path(7),
            7,
        )
    }

    #[test]
    fn test_pid_file_path() {
        assert_eq!(pid_file_path(1), "/tmp/devm-exec-1.pid");
        assert_eq!(pid_file_path(42), "/tmp/devm-exec-42.pid");
    }

    #[tokio::test]
    async fn test_start_records_pid_and_streams_output() {
        let engine = Arc::new(MockEngine::new());
        *engine.exec_output.lock().unwrap() = "line one\nline two".to_string();
        let process = process(engine.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        process.start(Some(tx)).await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("line one"));
        assert_eq!(rx.recv().await.as_deref(), Some("line two"));
        // the channel closes once the exec finishes
        assert!(rx.recv().await.is_none());

        let calls = engine.get_calls();
        let MockCall::ExecWithProgress { id, cmd } = &calls[0] else {
            panic!("unexpected call {:?}", calls[0]);
        };
        assert_eq!(id, "c0ffee");
        assert_eq!(cmd[2], "echo $$ > /tmp/devm-exec-7.pid; exec mvn clean install");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = Arc::new(MockEngine::new());
        let process = process(engine);
        process.start(None).await.unwrap();
        assert!(process.start(None).await.is_err());
    }

    #[tokio::test]
    async fn test_is_alive_follows_exit_code() {
        let engine = Arc::new(MockEngine::new());
        let process = process(engine.clone());
        assert!(process.is_alive().await);

        *engine.exec_exit_code.lock().unwrap() = 1;
        assert!(!process.is_alive().await);

        assert!(engine.was_called(&MockCall::Exec {
            id: "c0ffee".to_string(),
            cmd: vec![
                "sh".to_string(),
                "-c".to_string(),
                "kill -0 $(cat /tmp/devm-exec-7.pid) 2>/dev/null".to_string(),
            ],
        }));
    }

    #[tokio::test]
    async fn test_kill() {
        let engine = Arc::new(MockEngine::new());
        let process = process(engine.clone());
        process.kill().await.unwrap();

        *engine.exec_exit_code.lock().unwrap() = 1;
        let err = process.kill().await.unwrap_err();
        assert!(matches!(err, ProviderError::ExecError(_)));
    }

    #[tokio::test]
    async fn test_factory_rejects_stopped_container() {
        let engine = Arc::new(MockEngine::new());
        *engine.inspect_result.lock().unwrap() =
            Ok(mock_container_details("c0ffee", ContainerStatus::Exited));
        let factory = DockerProcessFactory::new(engine);

        let result = factory
            .create(
                &Command::new("run", "true"),
                &ContainerId::new("c0ffee"),
                None,
                &pid_file_path(1),
                1,
            )
            .await;
        assert!(matches!(result, Err(ProviderError::ExecError(_))));
    }

    #[tokio::test]
    async fn test_factory_binds_handle() {
        let engine = Arc::new(MockEngine::new());
        let factory = DockerProcessFactory::new(engine);

        let process = factory
            .create(
                &Command::new("run", "npm start"),
                &ContainerId::new("c0ffee"),
                Some("out"),
                &pid_file_path(3),
                3,
            )
            .await
            .unwrap();
        assert_eq!(process.pid(), 3);
        assert_eq!(process.command().command_line, "npm start");
        assert_eq!(process.output_channel(), Some("out"));
    }
}
