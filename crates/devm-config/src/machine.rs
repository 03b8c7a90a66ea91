//! Machine definitions and server declarations
//!
//! A machine definition is a small JSON document:
//!
//! ```json
//! {
//!   "name": "dev-machine",
//!   "dev": true,
//!   "servers": [
//!     { "ref": "tomcat", "port": "8080", "protocol": "http", "path": "/app" }
//!   ]
//! }
//! ```

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A network server declared for a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConf {
    /// Reference name clients look the server up by
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Port specification, e.g. `8080` or `8080/tcp`
    pub port: String,
    /// Protocol used to build URLs (e.g. `http`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Path appended to URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ServerConf {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            reference: None,
            port: port.into(),
            protocol: None,
            path: None,
        }
    }

    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Definition of a single machine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub name: Option<String>,
    /// Whether this is the workspace's dev machine
    pub dev: bool,
    pub servers: Vec<ServerConf>,
}

impl MachineConfig {
    /// Load a machine definition from a JSON file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse machine definition content
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::JsonParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        if let Some(bad) = config.servers.iter().find(|s| s.port.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "server {} has an empty port",
                bad.reference.as_deref().unwrap_or("<unnamed>")
            )));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_machine() {
        let json = r#"{
            "name": "dev-machine",
            "dev": true,
            "servers": [
                { "ref": "tomcat", "port": "8080", "protocol": "http", "path": "/app" },
                { "port": "5005/tcp" }
            ]
        }"#;

        let config = MachineConfig::parse(json, Path::new("machine.json")).unwrap();
        assert_eq!(config.name.as_deref(), Some("dev-machine"));
        assert!(config.dev);
        assert_eq!(
            config.servers[0],
            ServerConf::new("8080")
                .with_ref("tomcat")
                .with_protocol("http")
                .with_path("/app")
        );
        assert_eq!(config.servers[1], ServerConf::new("5005/tcp"));
    }

    #[test]
    fn test_defaults() {
        let config = MachineConfig::parse("{}", Path::new("machine.json")).unwrap();
        assert!(!config.dev);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_empty_port_rejected() {
        let json = r#"{ "servers": [ { "ref": "broken", "port": "" } ] }"#;
        let err = MachineConfig::parse(json, Path::new("machine.json")).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = MachineConfig::load_from(&tmp.path().join("machine.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_serialize_uses_ref_key() {
        let json = serde_json::to_string(&ServerConf::new("22").with_ref("ssh")).unwrap();
        assert_eq!(json, r#"{"ref":"ssh","port":"22"}"#);
    }
}
