//! Global configuration for devm
//!
//! Located at `~/.config/devm/config.toml`, or under `$DEVM_CONFIG_DIR` when set.

use crate::{ConfigError, Result, ServerConf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that relocates the config directory
pub const CONFIG_DIR_ENV: &str = "DEVM_CONFIG_DIR";

/// Global devm configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub docker: DockerConfig,
    pub snapshot: SnapshotConfig,
    pub servers: ServersConfig,
    pub processes: ProcessesConfig,
}

/// Docker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path or `http(s)://` endpoint
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Where and how machine snapshots are published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Registry host snapshots are pushed to (e.g. `localhost:5000`)
    pub registry: String,
    /// Optional namespace prepended to snapshot repositories
    pub namespace: Option<String>,
    /// Push snapshots to the registry instead of keeping them local
    pub use_registry: bool,
    /// Delay between commit and push, in milliseconds.
    /// Some engines (swarm in particular) do not list a freshly committed
    /// image right away.
    pub push_grace_period_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            registry: "localhost:5000".to_string(),
            namespace: None,
            use_registry: false,
            push_grace_period_ms: 2000,
        }
    }
}

impl SnapshotConfig {
    pub fn push_grace_period(&self) -> Duration {
        Duration::from_millis(self.push_grace_period_ms)
    }

    /// Configured registry host, `None` when left blank
    pub fn registry_host(&self) -> Option<&str> {
        let host = self.registry.trim().trim_end_matches('/');
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// Which endpoint resolution strategy machines use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Endpoints go through the internal host and host-published ports
    #[default]
    Default,
    /// Endpoints use the container's own address; requires a routable network
    LocalNetwork,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::LocalNetwork => write!(f, "local-network"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "local-network" | "local" => Ok(Self::LocalNetwork),
            _ => Err(format!("Unknown server evaluation strategy: {}", s)),
        }
    }
}

/// Server exposure settings and system server declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    pub strategy: StrategyKind,
    /// Host name containers use to reach the docker host
    pub internal_host: String,
    /// Host name clients outside the docker host should use, if different
    pub external_host: Option<String>,
    /// Servers added to every machine
    pub machine: Vec<ServerConf>,
    /// Servers added to the dev machine only
    pub dev_machine: Vec<ServerConf>,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Default,
            internal_host: "devm-host".to_string(),
            external_host: None,
            machine: Vec::new(),
            dev_machine: Vec::new(),
        }
    }
}

/// In-container process tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessesConfig {
    /// How often the stop detector inspects the container, in milliseconds
    pub stop_poll_interval_ms: u64,
}

impl Default for ProcessesConfig {
    fn default() -> Self {
        Self {
            stop_poll_interval_ms: 5000,
        }
    }
}

impl ProcessesConfig {
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.clone(),
            source: e,
        })?;

        tracing::debug!(
            "Loaded config from {:?}: strategy={}, use_registry={}",
            path,
            config.servers.strategy,
            config.snapshot.use_registry
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }

        let content = self.to_toml()?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        })
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        let dirs = ProjectDirs::from("", "", "devm").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
