//! Server declarations and exposed server endpoints
//!
//! A machine's servers come from three places: its own definition, the
//! system servers every machine gets, and the system servers reserved for
//! the dev machine. They are merged once into a [`ServerConfigTable`] keyed by
//! transport-qualified port (`8080/tcp`).

use devm_config::ServerConf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport assumed when a port specification has none
pub const DEFAULT_TRANSPORT: &str = "tcp";

/// Prefix of container labels that declare servers, e.g.
/// `devm.server.8080/tcp.ref=tomcat`
pub const SERVER_LABEL_PREFIX: &str = "devm.server.";

/// Qualify a port specification with a transport (`8080` -> `8080/tcp`).
/// Anything already containing `/` is returned as is.
pub fn normalize_port(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{}/{}", port, DEFAULT_TRANSPORT)
    }
}

/// Immutable mapping of normalized port key to server declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfigTable {
    entries: HashMap<String, ServerConf>,
}

impl ServerConfigTable {
    /// Merge server declarations into one table.
    ///
    /// Sources are applied in order: `declared`, `all_machines`, then
    /// `dev_machine` when `is_dev` is set. An entry from an earlier source is
    /// never replaced by a later one, so the machine's own declaration beats
    /// system servers on the same port. Inside one source the last duplicate
    /// wins.
    pub fn merge(
        declared: &[ServerConf],
        all_machines: &[ServerConf],
        dev_machine: &[ServerConf],
        is_dev: bool,
    ) -> Self {
        let mut sources = vec![declared, all_machines];
        if is_dev {
            sources.push(dev_machine);
        }

        let mut entries = HashMap::new();
        for source in sources {
            let mut layer: HashMap<String, &ServerConf> = HashMap::new();
            for conf in source {
                layer.insert(normalize_port(&conf.port), conf);
            }
            for (key, conf) in layer {
                entries.entry(key).or_insert_with(|| conf.clone());
            }
        }

        Self { entries }
    }

    pub fn get(&self, port_key: &str) -> Option<&ServerConf> {
        self.entries.get(port_key)
    }

    pub fn contains(&self, port_key: &str) -> bool {
        self.entries.contains_key(port_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServerConf)> {
        self.entries.iter()
    }

    /// Port keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Read server declarations baked into an image as container labels.
///
/// Recognized keys are `devm.server.<port>.ref`, `.protocol` and `.path`.
/// The result is keyed by normalized port.
pub fn servers_from_labels(labels: &HashMap<String, String>) -> HashMap<String, ServerConf> {
    let mut servers: HashMap<String, ServerConf> = HashMap::new();

    for (key, value) in labels {
        let Some(rest) = key.strip_prefix(SERVER_LABEL_PREFIX) else {
            continue;
        };
        let Some((port, field)) = rest.rsplit_once('.') else {
            continue;
        };
        if port.is_empty() {
            continue;
        }
        if !matches!(field, "ref" | "protocol" | "path") {
            tracing::debug!("Ignoring unknown server label {}", key);
            continue;
        }

        let port_key = normalize_port(port);
        let conf = servers
            .entry(port_key.clone())
            .or_insert_with(|| ServerConf::new(port_key));
        match field {
            "ref" => conf.reference = Some(value.clone()),
            "protocol" => conf.protocol = Some(value.clone()),
            _ => conf.path = Some(value.clone()),
        }
    }

    servers
}

/// Reference used for a server that has no `ref` of its own
pub fn default_server_ref(port_key: &str) -> String {
    format!("Server-{}", port_key.replace('/', "-"))
}

/// A server of a machine as reachable from outside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedServer {
    #[serde(rename = "ref")]
    pub reference: String,
    /// `host:port` clients use
    pub address: String,
    /// `host:port` other containers on the docker host use
    pub internal_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
}

impl ExposedServer {
    pub fn new(
        port_key: &str,
        conf: Option<&ServerConf>,
        address: String,
        internal_address: String,
    ) -> Self {
        let reference = conf
            .and_then(|c| c.reference.clone())
            .unwrap_or_else(|| default_server_ref(port_key));
        let protocol = conf.and_then(|c| c.protocol.clone());
        let path = conf.and_then(|c| c.path.clone());

        let url = protocol
            .as_deref()
            .map(|p| build_url(p, &address, path.as_deref()));
        let internal_url = protocol
            .as_deref()
            .map(|p| build_url(p, &internal_address, path.as_deref()));

        Self {
            reference,
            address,
            internal_address,
            protocol,
            path,
            url,
            internal_url,
        }
    }
}

fn build_url(protocol: &str, address: &str, path: Option<&str>) -> String {
    match path.filter(|p| !p.is_empty()) {
        Some(path) if path.starts_with('/') => format!("{}://{}{}", protocol, address, path),
        Some(path) => format!("{}://{}/{}", protocol, address, path),
        None => format!("{}://{}", protocol, address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_port() {
        assert_eq!(normalize_port("8080"), "8080/tcp");
        assert_eq!(normalize_port("9000/udp"), "9000/udp");
        // passed through uninterpreted
        assert_eq!(normalize_port("not-a-port"), "not-a-port/tcp");
        assert_eq!(normalize_port("/"), "/");
    }

    #[test]
    fn test_merge_precedence_scenario() {
        let declared = vec![ServerConf::new("8080").with_ref("app").with_protocol("http")];
        let all_machines = vec![ServerConf::new("9000/udp").with_ref("metrics")];
        let dev_only = vec![ServerConf::new("8080/tcp").with_ref("devOnly")];

        let table = ServerConfigTable::merge(&declared, &all_machines, &dev_only, true);

        assert_eq!(table.keys(), vec!["8080/tcp", "9000/udp"]);
        assert_eq!(
            table.get("8080/tcp").and_then(|c| c.reference.as_deref()),
            Some("app")
        );
    }

    #[test]
    fn test_machine_declaration_beats_every_system_source() {
        let declared = vec![ServerConf::new("4401/tcp").with_ref("mine")];
        let all_machines = vec![ServerConf::new("4401").with_ref("common")];
        let dev_only = vec![ServerConf::new("4401").with_ref("dev")];

        let table = ServerConfigTable::merge(&declared, &all_machines, &dev_only, true);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("4401/tcp").unwrap().reference.as_deref(), Some("mine"));
    }

    #[test]
    fn test_common_beats_dev_only() {
        let all_machines = vec![ServerConf::new("4411").with_ref("terminal")];
        let dev_only = vec![ServerConf::new("4411").with_ref("dev-terminal")];

        let table = ServerConfigTable::merge(&[], &all_machines, &dev_only, true);
        assert_eq!(table.get("4411/tcp").unwrap().reference.as_deref(), Some("terminal"));
    }

    #[test]
    fn test_dev_servers_skipped_for_non_dev_machine() {
        let dev_only = vec![ServerConf::new("4401").with_ref("wsagent")];
        let table = ServerConfigTable::merge(&[], &[], &dev_only, false);
        assert!(table.is_empty());
    }

    #[test]
    fn test_last_duplicate_wins_within_source() {
        let declared = vec![
            ServerConf::new("22").with_ref("first"),
            ServerConf::new("22/tcp").with_ref("second"),
        ];
        let table = ServerConfigTable::merge(&declared, &[], &[], false);
        assert_eq!(table.get("22/tcp").unwrap().reference.as_deref(), Some("second"));
    }

    #[test]
    fn test_every_key_is_transport_qualified() {
        let declared = vec![ServerConf::new("80"), ServerConf::new("53/udp")];
        let all_machines = vec![ServerConf::new("garbage"), ServerConf::new("443")];
        let dev_only = vec![ServerConf::new("8000")];

        let table = ServerConfigTable::merge(&declared, &all_machines, &dev_only, true);
        assert_eq!(table.len(), 5);
        assert!(table.keys().iter().all(|k| k.contains('/')));
    }

    #[test]
    fn test_merge_invariants_over_generated_sources() {
        let mut specs = Vec::new();
        for number in ["0", "22", "80", "8080", "65535"] {
            for suffix in ["", "/tcp", "/udp"] {
                specs.push(format!("{}{}", number, suffix));
            }
        }
        specs.extend(["garbage", "/", "a/b", "8080/sctp"].map(String::from));

        for spec in &specs {
            let key = normalize_port(spec);
            // the same port spelled both ways across sources
            let spellings = [spec.clone(), key.clone()];

            for mask in 0u8..8 {
                for is_dev in [false, true] {
                    for rotation in 0..3 {
                        let mut sources: [Vec<ServerConf>; 3] = Default::default();
                        for (i, name) in ["declared", "common", "dev"].iter().enumerate() {
                            // unrelated entries around the shared port
                            sources[i].push(ServerConf::new(format!("{}01", i + 1)));
                            if mask & (1 << i) != 0 {
                                let port = &spellings[(i + rotation) % 2];
                                sources[i].push(ServerConf::new(port.clone()).with_ref(*name));
                            }
                            sources[i].push(ServerConf::new(format!("{}02/udp", i + 1)));
                            let len = sources[i].len();
                            sources[i].rotate_left(rotation % len);
                        }

                        let table =
                            ServerConfigTable::merge(&sources[0], &sources[1], &sources[2], is_dev);
                        assert!(
                            table.keys().iter().all(|k| k.contains('/')),
                            "unqualified key for {:?}",
                            spec
                        );

                        let expected = if mask & 1 != 0 {
                            Some("declared")
                        } else if mask & 2 != 0 {
                            Some("common")
                        } else if mask & 4 != 0 && is_dev {
                            Some("dev")
                        } else {
                            None
                        };
                        let actual = table.get(&key).and_then(|c| c.reference.as_deref());
                        assert_eq!(
                            actual, expected,
                            "port {:?} mask {} is_dev {} rotation {}",
                            spec, mask, is_dev, rotation
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_servers_from_labels() {
        let labels = HashMap::from([
            ("devm.server.8080/tcp.ref".to_string(), "tomcat".to_string()),
            ("devm.server.8080/tcp.protocol".to_string(), "http".to_string()),
            ("devm.server.5005.ref".to_string(), "debug".to_string()),
            ("devm.server.5005.color".to_string(), "blue".to_string()),
            ("com.example.other".to_string(), "x".to_string()),
        ]);

        let servers = servers_from_labels(&labels);
        assert_eq!(servers.len(), 2);
        let tomcat = &servers["8080/tcp"];
        assert_eq!(tomcat.reference.as_deref(), Some("tomcat"));
        assert_eq!(tomcat.protocol.as_deref(), Some("http"));
        assert_eq!(servers["5005/tcp"].reference.as_deref(), Some("debug"));
    }

    #[test]
    fn test_exposed_server_urls() {
        let conf = ServerConf::new("8080").with_ref("app").with_protocol("http").with_path("api");
        let server = ExposedServer::new(
            "8080/tcp",
            Some(&conf),
            "example.com:32768".to_string(),
            "devm-host:32768".to_string(),
        );
        assert_eq!(server.reference, "app");
        assert_eq!(server.url.as_deref(), Some("http://example.com:32768/api"));
        assert_eq!(server.internal_url.as_deref(), Some("http://devm-host:32768/api"));
    }

    #[test]
    fn test_exposed_server_without_config() {
        let server = ExposedServer::new(
            "9000/udp",
            None,
            "devm-host:9000".to_string(),
            "devm-host:9000".to_string(),
        );
        assert_eq!(server.reference, "Server-9000-udp");
        assert!(server.url.is_none());
        assert!(server.protocol.is_none());
    }

    #[test]
    fn test_exposed_server_json_uses_ref_key() {
        let server = ExposedServer::new(
            "22/tcp",
            None,
            "devm-host:2222".to_string(),
            "devm-host:2222".to_string(),
        );
        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json["ref"], "Server-22-tcp");
        assert!(json.get("url").is_none());
    }
}
