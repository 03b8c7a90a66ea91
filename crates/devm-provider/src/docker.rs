//! Docker engine implementation using bollard

use crate::{
    ContainerDetails, ContainerEngine, ContainerId, ContainerStatus, ExecConfig,
    ExecResult, ImageId, MountInfo, NetworkInfo, NetworkSettings, PortInfo, ProviderError,
    PushProgress, PushTarget, Result,
};
use async_trait::async_trait;
use bollard::container::{Config, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, PushImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;

/// Docker engine using bollard crate
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect to a Docker engine
    pub async fn new(socket_path: &str) -> Result<Self> {
        let client = if socket_path.starts_with("http://") || socket_path.starts_with("https://")
        {
            Docker::connect_with_http(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }

    async fn start_attached_exec(
        &self,
        id: &ContainerId,
        config: &ExecConfig,
    ) -> Result<(String, StartExecResults)> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            tty: Some(config.tty),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&id.0, options).await?;

        let start_options = StartExecOptions {
            detach: false,
            tty: config.tty,
            ..Default::default()
        };

        let started = self
            .client
            .start_exec(&exec.id, Some(start_options))
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?;

        Ok((exec.id, started))
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64> {
        let inspect = self.client.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code.unwrap_or(0))
    }
}

fn log_output_text(output: LogOutput) -> String {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => String::from_utf8_lossy(&message).into_owned(),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let config = info.config.as_ref();

        let mounts = info
            .mounts
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                mount_type: m
                    .typ
                    .map(|t| format!("{:?}", t).to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string()),
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
                read_only: m.rw.map(|rw| !rw).unwrap_or(false),
            })
            .collect();

        let mut ports = Vec::new();
        if let Some(port_map) = info.network_settings.as_ref().and_then(|n| n.ports.as_ref()) {
            for (container_port, bindings) in port_map {
                let (port, protocol) = match container_port.split_once('/') {
                    Some((port, protocol)) => (port, protocol),
                    None => (container_port.as_str(), "tcp"),
                };
                let Ok(port_num) = port.parse::<u16>() else {
                    tracing::debug!("Skipping unparseable port key {}", container_port);
                    continue;
                };

                match bindings {
                    Some(bindings) if !bindings.is_empty() => {
                        for binding in bindings {
                            ports.push(PortInfo {
                                container_port: port_num,
                                host_port: binding.host_port.as_ref().and_then(|p| p.parse().ok()),
                                protocol: protocol.to_string(),
                                host_ip: binding.host_ip.clone(),
                            });
                        }
                    }
                    _ => ports.push(PortInfo {
                        container_port: port_num,
                        host_port: None,
                        protocol: protocol.to_string(),
                        host_ip: None,
                    }),
                }
            }
        }
        ports.sort_by(|a, b| (a.container_port, &a.protocol).cmp(&(b.container_port, &b.protocol)));

        let network_settings = info
            .network_settings
            .as_ref()
            .map(|ns| NetworkSettings {
                ip_address: ns.ip_address.clone(),
                gateway: ns.gateway.clone(),
                networks: ns
                    .networks
                    .as_ref()
                    .map(|nets| {
                        nets.iter()
                            .map(|(name, net)| {
                                (
                                    name.clone(),
                                    NetworkInfo {
                                        network_id: net.network_id.clone().unwrap_or_default(),
                                        ip_address: net.ip_address.clone(),
                                        gateway: net.gateway.clone(),
                                    },
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: ContainerId::new(info.id.clone().unwrap_or_else(|| id.0.clone())),
            name: info
                .name
                .clone()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            image_id: info.image.clone().unwrap_or_default(),
            status,
            started_at,
            exit_code: state.and_then(|s| s.exit_code),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            env: config.and_then(|c| c.env.clone()).unwrap_or_default(),
            mounts,
            ports,
            network_settings,
        })
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        let (exec_id, started) = self.start_attached_exec(id, config).await?;

        let mut output_str = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                let chunk = chunk.map_err(|e| ProviderError::ExecError(e.to_string()))?;
                output_str.push_str(&log_output_text(chunk));
            }
        }

        let exit_code = self.exec_exit_code(&exec_id).await?;
        Ok(ExecResult {
            exit_code,
            output: output_str,
        })
    }

    async fn exec_with_progress(
        &self,
        id: &ContainerId,
        config: &ExecConfig,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<ExecResult> {
        let (exec_id, started) = self.start_attached_exec(id, config).await?;

        let mut output_str = String::new();
        let mut pending = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                let chunk = chunk.map_err(|e| ProviderError::ExecError(e.to_string()))?;
                let text = log_output_text(chunk);
                output_str.push_str(&text);
                pending.push_str(&text);
                while let Some(pos) = pending.find('\n') {
                    let line: String = pending.drain(..=pos).collect();
                    let _ = progress.send(line.trim_end_matches(['\r', '\n']).to_string());
                }
            }
        }
        if !pending.is_empty() {
            let _ = progress.send(pending);
        }

        let exit_code = self.exec_exit_code(&exec_id).await?;
        Ok(ExecResult {
            exit_code,
            output: output_str,
        })
    }

    async fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId> {
        let options = CommitContainerOptions {
            container: id.0.clone(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };

        self.client
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| ProviderError::CommitError(e.to_string()))?;

        let reference = format!("{}:{}", repo, tag);
        let image = self
            .client
            .inspect_image(&reference)
            .await
            .map_err(|e| ProviderError::ImageNotFound(format!("{}: {}", reference, e)))?;

        tracing::debug!("Committed container {} as {}", id.short(), reference);
        Ok(ImageId::new(image.id.unwrap_or(reference)))
    }

    async fn push(
        &self,
        target: &PushTarget,
        progress: mpsc::UnboundedSender<PushProgress>,
    ) -> Result<Option<String>> {
        let options = PushImageOptions {
            tag: target.tag.clone(),
        };

        let repo = target.full_repo();
        let mut stream = self.client.push_image(&repo, Some(options), None);

        let mut digest = None;
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| ProviderError::PushError(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(ProviderError::PushError(error));
            }
            if let Some(found) = info.status.as_deref().and_then(crate::parse_push_digest) {
                digest = Some(found);
            }
            let detail = info.progress_detail.as_ref();
            let _ = progress.send(PushProgress {
                id: None,
                status: info.status.clone(),
                progress: info.progress.clone(),
                current: detail.and_then(|d| d.current),
                total: detail.and_then(|d| d.total),
                error: None,
            });
        }

        Ok(digest)
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_image(image, Some(options), None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => ProviderError::ImageNotFound(message),
                other => ProviderError::RuntimeError(other.to_string()),
            })?;
        Ok(())
    }
}
