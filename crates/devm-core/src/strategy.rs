//! Server evaluation strategies
//!
//! Turn the network facts of a container into endpoints clients can reach.
//! Which strategy a machine uses is fixed when the machine is constructed.

use crate::servers::{default_server_ref, servers_from_labels, ExposedServer, ServerConfigTable};
use devm_config::{ServersConfig, StrategyKind};
use devm_provider::ContainerDetails;
use std::collections::{HashMap, HashSet};

/// How exposed servers of a machine are addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvaluationStrategy {
    /// Go through the docker host: `<internal host>:<published host port>`.
    /// `external_host` replaces the internal host in client-facing addresses.
    InternalHost { external_host: Option<String> },
    /// Caller and container share a routable network:
    /// `<container ip>:<container port>`.
    Direct,
}

impl Default for ServerEvaluationStrategy {
    fn default() -> Self {
        Self::InternalHost {
            external_host: None,
        }
    }
}

impl ServerEvaluationStrategy {
    /// Select the strategy named in the servers configuration
    pub fn from_config(config: &ServersConfig) -> Self {
        match config.strategy {
            StrategyKind::Default => Self::InternalHost {
                external_host: config.external_host.clone(),
            },
            StrategyKind::LocalNetwork => Self::Direct,
        }
    }

    /// Resolve the servers exposed by a container.
    ///
    /// Every exposed port of `info` is a candidate. Declarations come from
    /// `table` first and from server labels on the container second. Ports
    /// that cannot be addressed with this strategy are left out of the result.
    ///
    /// Ports are visited in key order. When a `ref` is already taken by a
    /// lower port, the later server falls back to its default reference.
    pub fn resolve(
        &self,
        info: &ContainerDetails,
        internal_host: &str,
        table: &ServerConfigTable,
    ) -> HashMap<String, ExposedServer> {
        let labeled = servers_from_labels(&info.labels);
        let mut seen = HashSet::new();
        let mut servers: HashMap<String, ExposedServer> = HashMap::new();

        let mut ports: Vec<_> = info.ports.iter().collect();
        ports.sort_by_key(|port| port.key());

        for port in ports {
            let key = port.key();
            if seen.contains(&key) {
                continue;
            }

            let endpoint = match self {
                Self::InternalHost { external_host } => port.host_port.map(|host_port| {
                    let internal = format!("{}:{}", internal_host, host_port);
                    let external = match external_host {
                        Some(host) => format!("{}:{}", host, host_port),
                        None => internal.clone(),
                    };
                    (external, internal)
                }),
                Self::Direct => info.container_ip().map(|ip| {
                    let address = format!("{}:{}", ip, port.container_port);
                    (address.clone(), address)
                }),
            };

            let Some((address, internal_address)) = endpoint else {
                tracing::debug!(
                    "Port {} of container {} is not reachable, skipping",
                    key,
                    info.id.short()
                );
                continue;
            };

            seen.insert(key.clone());
            let conf = table.get(&key).or_else(|| labeled.get(&key));
            let mut server = ExposedServer::new(&key, conf, address, internal_address);
            if servers.contains_key(&server.reference) {
                let fallback = unique_reference(&servers, default_server_ref(&key));
                tracing::warn!(
                    "Server ref '{}' of port {} is already used, exposing it as '{}'",
                    server.reference,
                    key,
                    fallback
                );
                server.reference = fallback;
            }
            servers.insert(server.reference.clone(), server);
        }

        servers
    }
}

fn unique_reference(servers: &HashMap<String, ExposedServer>, base: String) -> String {
    if !servers.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !servers.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_container_details, port};
    use devm_config::ServerConf;
    use devm_provider::ContainerStatus;

    fn table() -> ServerConfigTable {
        ServerConfigTable::merge(
            &[ServerConf::new("8080")
                .with_ref("tomcat")
                .with_protocol("http")
                .with_path("/app")],
            &[ServerConf::new("4412/tcp").with_ref("exec-agent").with_protocol("ws")],
            &[],
            false,
        )
    }

    fn details() -> ContainerDetails {
        let mut info = mock_container_details("c0ffee", ContainerStatus::Running);
        info.network_settings.ip_address = Some("172.17.0.5".to_string());
        info.ports = vec![
            port(8080, Some(32768), "tcp"),
            port(4412, Some(32769), "tcp"),
            port(22, Some(32770), "tcp"),
            port(9000, None, "udp"),
        ];
        info
    }

    #[test]
    fn test_internal_host_strategy() {
        let strategy = ServerEvaluationStrategy::default();
        let servers = strategy.resolve(&details(), "devm-host", &table());

        let tomcat = &servers["tomcat"];
        assert_eq!(tomcat.address, "devm-host:32768");
        assert_eq!(tomcat.url.as_deref(), Some("http://devm-host:32768/app"));
        assert_eq!(servers["exec-agent"].url.as_deref(), Some("ws://devm-host:32769"));

        // exposed but undeclared ports are still reported
        let ssh = &servers["Server-22-tcp"];
        assert_eq!(ssh.address, "devm-host:32770");
        assert!(ssh.url.is_none());

        // not published on the host, so not reachable through it
        assert!(!servers.contains_key("Server-9000-udp"));
        assert_eq!(servers.len(), 3);
    }

    #[test]
    fn test_internal_host_with_external_override() {
        let strategy = ServerEvaluationStrategy::InternalHost {
            external_host: Some("ide.example.com".to_string()),
        };
        let servers = strategy.resolve(&details(), "devm-host", &table());

        let tomcat = &servers["tomcat"];
        assert_eq!(tomcat.address, "ide.example.com:32768");
        assert_eq!(tomcat.internal_address, "devm-host:32768");
        assert_eq!(tomcat.internal_url.as_deref(), Some("http://devm-host:32768/app"));
    }

    #[test]
    fn test_direct_strategy() {
        let servers = ServerEvaluationStrategy::Direct.resolve(&details(), "devm-host", &table());

        assert_eq!(servers["tomcat"].address, "172.17.0.5:8080");
        assert_eq!(servers["Server-9000-udp"].address, "172.17.0.5:9000");
        assert_eq!(servers.len(), 4);
    }

    #[test]
    fn test_direct_strategy_without_ip_is_empty() {
        let mut info = details();
        info.network_settings.ip_address = None;
        let servers = ServerEvaluationStrategy::Direct.resolve(&info, "devm-host", &table());
        assert!(servers.is_empty());
    }

    #[test]
    fn test_declared_but_not_exposed_is_omitted() {
        let mut info = details();
        info.ports.retain(|p| p.container_port != 8080);
        let servers = ServerEvaluationStrategy::default().resolve(&info, "devm-host", &table());
        assert!(!servers.contains_key("tomcat"));
    }

    #[test]
    fn test_labels_fill_undeclared_ports() {
        let mut info = details();
        info.labels.insert("devm.server.22/tcp.ref".to_string(), "ssh".to_string());
        info.labels.insert("devm.server.22/tcp.protocol".to_string(), "ssh".to_string());
        // table wins over labels
        info.labels.insert("devm.server.8080.ref".to_string(), "ignored".to_string());

        let servers = ServerEvaluationStrategy::default().resolve(&info, "devm-host", &table());
        assert_eq!(servers["ssh"].url.as_deref(), Some("ssh://devm-host:32770"));
        assert!(servers.contains_key("tomcat"));
        assert!(!servers.contains_key("ignored"));
    }

    #[test]
    fn test_duplicate_bindings_resolve_once() {
        let mut info = details();
        info.ports = vec![port(8080, None, "tcp"), port(8080, Some(40000), "tcp")];
        let servers = ServerEvaluationStrategy::default().resolve(&info, "devm-host", &table());
        assert_eq!(servers.len(), 1);
        assert_eq!(servers["tomcat"].address, "devm-host:40000");
    }

    #[test]
    fn test_shared_ref_keeps_both_servers() {
        let table = ServerConfigTable::merge(
            &[
                ServerConf::new("8081").with_ref("web").with_protocol("http"),
                ServerConf::new("8080").with_ref("web").with_protocol("http"),
            ],
            &[],
            &[],
            false,
        );
        let mut info = details();
        // reversed binding order must not change who keeps the ref
        info.ports = vec![port(8081, Some(32769), "tcp"), port(8080, Some(32768), "tcp")];

        let servers = ServerEvaluationStrategy::default().resolve(&info, "devm-host", &table);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["web"].address, "devm-host:32768");
        let second = &servers["Server-8081-tcp"];
        assert_eq!(second.address, "devm-host:32769");
        assert_eq!(second.url.as_deref(), Some("http://devm-host:32769"));
    }

    #[test]
    fn test_fallback_ref_collision_gets_suffix() {
        let table = ServerConfigTable::merge(
            &[
                ServerConf::new("8080").with_ref("Server-8081-tcp"),
                ServerConf::new("8081").with_ref("Server-8081-tcp"),
            ],
            &[],
            &[],
            false,
        );
        let mut info = details();
        info.ports = vec![port(8080, Some(32768), "tcp"), port(8081, Some(32769), "tcp")];

        let servers = ServerEvaluationStrategy::default().resolve(&info, "devm-host", &table);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["Server-8081-tcp"].address, "devm-host:32768");
        assert_eq!(servers["Server-8081-tcp-2"].address, "devm-host:32769");
    }

    #[test]
    fn test_from_config() {
        let mut config = ServersConfig::default();
        assert_eq!(
            ServerEvaluationStrategy::from_config(&config),
            ServerEvaluationStrategy::InternalHost {
                external_host: None
            }
        );
        config.strategy = StrategyKind::LocalNetwork;
        assert_eq!(
            ServerEvaluationStrategy::from_config(&config),
            ServerEvaluationStrategy::Direct
        );
    }
}
