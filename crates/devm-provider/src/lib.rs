//! Container engine trait and implementations for devm
//!
//! This crate provides an abstraction over the container engine a machine
//! runs on, covering the primitives the machine runtime needs: inspecting a
//! container, running commands in it, and committing/pushing/removing images.

mod docker;
mod error;
mod types;

pub use docker::DockerEngine;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Trait for container engines (Docker and API-compatible engines)
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Get a point-in-time view of a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Execute a command in a running container and wait for it
    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult>;

    /// Execute a command, sending each output line to `progress` as it arrives
    async fn exec_with_progress(
        &self,
        id: &ContainerId,
        config: &ExecConfig,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<ExecResult>;

    /// Materialize the container filesystem as the local image `repo:tag`
    async fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId>;

    /// Push an image, reporting engine progress on `progress`.
    /// Returns the manifest digest when the engine reports one.
    async fn push(
        &self,
        target: &PushTarget,
        progress: mpsc::UnboundedSender<PushProgress>,
    ) -> Result<Option<String>>;

    /// Remove a local image reference
    async fn remove_image(&self, image: &str, force: bool) -> Result<()>;
}

/// Connect to the engine configured in the global config
pub async fn create_engine(
    config: &devm_config::GlobalConfig,
) -> Result<Arc<dyn ContainerEngine>> {
    let socket = &config.docker.socket;
    match DockerEngine::new(socket).await {
        Ok(engine) => {
            tracing::debug!("Connected to docker engine at {}", socket);
            Ok(Arc::new(engine))
        }
        Err(e) => {
            let socket_exists = socket.starts_with("http")
                || std::path::Path::new(socket.trim_start_matches("unix://")).exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                socket,
                socket_exists,
                &e,
            )))
        }
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(socket_path: &str, socket_exists: bool, underlying: &ProviderError) -> String {
    let mut msg = String::from("Cannot connect to Docker\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket_path
        ));
        msg.push_str("To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_missing_socket() {
        let err = ProviderError::ConnectionError("refused".to_string());
        let msg = format_connection_error("/nope/docker.sock", false, &err);
        assert!(msg.contains("/nope/docker.sock"));
        assert!(msg.contains("systemctl"));
        assert!(!msg.contains("refused"));
    }

    #[test]
    fn test_connection_error_unresponsive_daemon() {
        let err = ProviderError::ConnectionError("refused".to_string());
        let msg = format_connection_error("/var/run/docker.sock", true, &err);
        assert!(msg.contains("not responding"));
        assert!(msg.contains("refused"));
    }
}
