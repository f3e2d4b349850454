//! Node Configuration
//!
//! Settings are loaded from a JSON document:
//!
//! ```json
//! {
//!   "discovery": { "coordination_address": "127.0.0.1:2181", "cluster_name": "search" },
//!   "server": {
//!     "advertised_host": "node-1.internal",
//!     "application_connectors": [{ "type": "http", "bind_host": "0.0.0.0", "port": 8080 }]
//!   }
//! }
//! ```
//!
//! The node's externally reachable `(host, port)` is derived from the server
//! section; see [`ServerConfig::node_address`].

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 2000;

fn default_resolve_timeout_ms() -> u64 {
    DEFAULT_RESOLVE_TIMEOUT_MS
}

/// Cluster name plus the address of the coordination service holding it.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    name: String,
    coordination_address: String,
}

impl ClusterIdentity {
    pub fn new(name: impl Into<String>, coordination_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordination_address: coordination_address.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordination_address(&self) -> &str {
        &self.coordination_address
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.coordination_address, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub coordination_address: String,
    pub cluster_name: String,
    /// Upper bound for a single instance-config read during a membership refresh.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

impl DiscoveryConfig {
    pub fn cluster_identity(&self) -> ClusterIdentity {
        ClusterIdentity::new(&self.cluster_name, &self.coordination_address)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectorConfig {
    Http { bind_host: Option<String>, port: u16 },
    Https { bind_host: Option<String>, port: u16 },
}

impl ConnectorConfig {
    pub fn port(&self) -> u16 {
        match self {
            ConnectorConfig::Http { port, .. } | ConnectorConfig::Https { port, .. } => *port,
        }
    }

    pub fn bind_host(&self) -> Option<&str> {
        match self {
            ConnectorConfig::Http { bind_host, .. } | ConnectorConfig::Https { bind_host, .. } => {
                bind_host.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub advertised_host: Option<String>,
    #[serde(default)]
    pub application_connectors: Vec<ConnectorConfig>,
}

/// The single externally reachable address this node registers under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Instance name under which this node is registered: `<host>_<port>`.
    pub fn instance_name(&self) -> String {
        format!("{}_{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl ServerConfig {
    /// Port of the main application connector (the first one configured).
    pub fn application_port(&self) -> Result<u16> {
        let connector = self.application_connectors.first().ok_or_else(|| {
            DiscoveryError::Configuration("no application connector configured".to_string())
        })?;

        match connector.port() {
            0 => Err(DiscoveryError::Configuration(
                "application connector has no fixed port".to_string(),
            )),
            port => Ok(port),
        }
    }

    /// Resolves the `(host, port)` pair this node advertises to the cluster.
    pub fn node_address(&self) -> Result<NodeAddress> {
        let port = self.application_port()?;
        let bind_host = self
            .application_connectors
            .first()
            .and_then(|c| c.bind_host())
            .filter(|host| is_concrete_host(host))
            .map(str::to_string);

        let host = self
            .advertised_host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .or(bind_host)
            .or_else(local_host_name)
            .ok_or_else(|| {
                DiscoveryError::Configuration(
                    "could not determine an externally reachable host name".to_string(),
                )
            })?;

        Ok(NodeAddress::new(host, port))
    }
}

/// This machine's host name, used when neither an advertised host nor a
/// concrete bind host is configured.
fn local_host_name() -> Option<String> {
    match hostname::get() {
        Ok(name) => Some(name.to_string_lossy().into_owned()).filter(|h| is_concrete_host(h)),
        Err(e) => {
            tracing::debug!("Could not read local host name: {}", e);
            None
        }
    }
}

fn is_concrete_host(host: &str) -> bool {
    if host.trim().is_empty() {
        return false;
    }

    match host.parse::<IpAddr>() {
        Ok(ip) => !ip.is_unspecified(),
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(advertised: Option<&str>, connectors: Vec<ConnectorConfig>) -> ServerConfig {
        ServerConfig {
            advertised_host: advertised.map(str::to_string),
            application_connectors: connectors,
        }
    }

    #[test]
    fn test_instance_name_format() {
        let addr = NodeAddress::new("node-1.internal", 8080);
        assert_eq!(addr.instance_name(), "node-1.internal_8080");
        assert_eq!(addr.to_string(), "node-1.internal:8080");
    }

    #[test]
    fn test_port_from_https_connector() {
        let config = server(
            Some("svc.local"),
            vec![ConnectorConfig::Https {
                bind_host: None,
                port: 8443,
            }],
        );

        assert_eq!(config.node_address().unwrap(), NodeAddress::new("svc.local", 8443));
    }

    #[test]
    fn test_first_connector_wins() {
        let config = server(
            Some("svc.local"),
            vec![
                ConnectorConfig::Http {
                    bind_host: None,
                    port: 9000,
                },
                ConnectorConfig::Https {
                    bind_host: None,
                    port: 9443,
                },
            ],
        );

        assert_eq!(config.application_port().unwrap(), 9000);
    }

    #[test]
    fn test_missing_connector_is_configuration_error() {
        let config = server(Some("svc.local"), vec![]);

        assert!(matches!(
            config.node_address(),
            Err(DiscoveryError::Configuration(_))
        ));
    }

    #[test]
    fn test_ephemeral_port_is_configuration_error() {
        let config = server(
            Some("svc.local"),
            vec![ConnectorConfig::Http {
                bind_host: None,
                port: 0,
            }],
        );

        assert!(matches!(
            config.application_port(),
            Err(DiscoveryError::Configuration(_))
        ));
    }

    #[test]
    fn test_concrete_bind_host_used_when_not_advertised() {
        let config = server(
            None,
            vec![ConnectorConfig::Http {
                bind_host: Some("10.1.2.3".to_string()),
                port: 8080,
            }],
        );

        assert_eq!(config.node_address().unwrap().host, "10.1.2.3");
    }

    #[test]
    fn test_unspecified_bind_host_is_skipped() {
        assert!(!is_concrete_host("0.0.0.0"));
        assert!(!is_concrete_host("::"));
        assert!(!is_concrete_host(""));
        assert!(is_concrete_host("localhost"));
        assert!(is_concrete_host("127.0.0.1"));
    }

    #[test]
    fn test_wildcard_bind_falls_back_to_machine_host_name() {
        let config = server(
            None,
            vec![ConnectorConfig::Http {
                bind_host: Some("0.0.0.0".to_string()),
                port: 8080,
            }],
        );

        let expected = hostname::get()
            .expect("machine host name")
            .to_string_lossy()
            .into_owned();
        let addr = config.node_address().expect("host name fallback");

        assert_eq!(addr, NodeAddress::new(expected.clone(), 8080));
        assert_eq!(addr.instance_name(), format!("{}_8080", expected));
    }

    #[test]
    fn test_app_config_from_json() {
        let json = r#"{
            "discovery": { "coordination_address": "127.0.0.1:2181", "cluster_name": "search" },
            "server": {
                "advertised_host": "node-1",
                "application_connectors": [{ "type": "http", "bind_host": "0.0.0.0", "port": 8080 }]
            }
        }"#;

        let config = AppConfig::from_json(json).expect("config should parse");

        assert_eq!(config.discovery.cluster_name, "search");
        assert_eq!(config.discovery.resolve_timeout_ms, DEFAULT_RESOLVE_TIMEOUT_MS);
        assert_eq!(
            config.discovery.cluster_identity(),
            ClusterIdentity::new("search", "127.0.0.1:2181")
        );
        assert_eq!(config.server.node_address().unwrap(), NodeAddress::new("node-1", 8080));
    }
}
