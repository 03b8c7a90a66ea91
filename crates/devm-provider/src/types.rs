//! Common types for container engines

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First 12 characters of the id
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Whether processes can still run inside the container
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Restarting)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Allocate TTY
    pub tty: bool,
}

impl ExecConfig {
    /// Run a shell snippet through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            cmd: vec!["sh".to_string(), "-c".to_string(), script.into()],
            ..Default::default()
        }
    }
}

/// Result of exec command
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

/// Point-in-time view of a container as reported by the engine.
///
/// Callers re-fetch this whenever they need fresh network facts; nothing
/// in it is kept up to date by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub status: ContainerStatus,
    pub started_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<MountInfo>,
    pub ports: Vec<PortInfo>,
    pub network_settings: NetworkSettings,
}

impl ContainerDetails {
    /// First usable IP address of the container on any attached network
    pub fn container_ip(&self) -> Option<&str> {
        self.network_settings
            .ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                let mut names: Vec<&String> = self.network_settings.networks.keys().collect();
                names.sort();
                names.into_iter().find_map(|name| {
                    self.network_settings.networks[name]
                        .ip_address
                        .as_deref()
                        .filter(|ip| !ip.is_empty())
                })
            })
    }
}

/// Mount information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountInfo {
    pub mount_type: String,
    pub source: String,
    pub destination: String,
    pub read_only: bool,
}

/// Port information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

impl PortInfo {
    /// Port key in the engine's `<port>/<transport>` form
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Network settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub networks: HashMap<String, NetworkInfo>,
}

/// Network information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network_id: String,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
}

/// Where an image is pushed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Repository name without registry, e.g. `team/machine_snapshot_abc`
    pub repository: String,
    /// Registry host, e.g. `localhost:5000`
    pub registry: Option<String>,
    pub tag: String,
}

impl PushTarget {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            registry: None,
            tag: tag.into(),
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Repository qualified with the registry host
    pub fn full_repo(&self) -> String {
        match &self.registry {
            Some(registry) if !registry.is_empty() => {
                format!("{}/{}", registry, self.repository)
            }
            _ => self.repository.clone(),
        }
    }

    /// Fully qualified `<registry>/<repository>:<tag>` reference
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.full_repo(), self.tag)
    }
}

/// One progress message reported by the engine during a push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushProgress {
    /// Layer id the message refers to
    pub id: Option<String>,
    pub status: Option<String>,
    /// Human readable progress bar
    pub progress: Option<String>,
    pub current: Option<i64>,
    pub total: Option<i64>,
    pub error: Option<String>,
}

/// Extract the manifest digest from a push status line such as
/// `latest: digest: sha256:0123... size: 527`
pub fn parse_push_digest(status: &str) -> Option<String> {
    let rest = &status[status.find("digest: ")? + "digest: ".len()..];
    let digest = rest.split_whitespace().next()?;
    if digest.contains(':') {
        Some(digest.to_string())
    } else {
        None
    }
}
