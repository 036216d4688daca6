//! Server configuration
//!
//! Loaded from an optional TOML file, then overridden by `DX_ADMIN_*`
//! environment variables (a `.env` file is honoured).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One remote cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// Peer identity as `name:port`; the name is also used for TLS validation
    pub host: String,

    /// Dial this address instead of resolving `host`
    #[serde(default)]
    pub addr: Option<SocketAddr>,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            addr: None,
        }
    }

    /// Host name without the port
    pub fn name(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((name, port)) if port.parse::<u16>().is_ok() => name,
            _ => &self.host,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Talk to peers over HTTPS
    pub enabled: bool,

    /// Extra root CA bundle (PEM) trusted for peer certificates
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// How long a finished/stopped/failed sequence stays queryable
    pub retention_secs: u64,

    /// How often expired sequences are evicted
    pub janitor_interval_secs: u64,

    /// Result items buffered before the producer waits for the client
    pub max_unconsumed_items: usize,

    /// How long the producer waits for a client to drain a full buffer
    pub client_timeout_secs: u64,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            retention_secs: 600,
            janitor_interval_secs: 300,
            max_unconsumed_items: 1000,
            client_timeout_secs: 600,
        }
    }
}

impl HealConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Write daily-rolling log files here in addition to stderr
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Complete admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Address the admin and peer RPC endpoints listen on
    pub bind_addr: SocketAddr,

    /// Identity of this node in broadcast results (`name:port`)
    pub node_name: String,

    /// Every other node of the cluster
    pub peers: Vec<PeerEndpoint>,

    pub tls: TlsConfig,

    /// Admin access key
    pub access_key: String,

    /// Admin secret key
    pub secret_key: String,

    pub region: String,

    /// Interval between keep-alive filler writes on slow responses
    pub keepalive_interval_ms: u64,

    /// Upper bound for one peer RPC call
    pub peer_timeout_secs: u64,

    /// Where IAM state is persisted; in-memory only when unset
    pub state_dir: Option<PathBuf>,

    /// Drives exposed by the in-memory object layer
    pub disk_count: usize,

    pub heal: HealConfig,

    pub log: LogConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            node_name: "localhost:9000".to_string(),
            peers: Vec::new(),
            tls: TlsConfig::default(),
            access_key: "dxadmin".to_string(),
            secret_key: "dxadmin-secret".to_string(),
            region: "us-east-1".to_string(),
            keepalive_interval_ms: 10_000,
            peer_timeout_secs: 30,
            state_dir: None,
            disk_count: 4,
            heal: HealConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AdminConfig {
    /// Load configuration from an optional TOML file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("DX_ADMIN_ADDRESS") {
            self.bind_addr = addr
                .parse()
                .with_context(|| format!("DX_ADMIN_ADDRESS is not a socket address: {addr}"))?;
        }
        if let Ok(name) = std::env::var("DX_ADMIN_NODE_NAME") {
            self.node_name = name;
        }
        if let Ok(peers) = std::env::var("DX_ADMIN_PEERS") {
            self.peers = parse_peer_list(&peers);
        }
        if let Ok(key) = std::env::var("DX_ADMIN_ACCESS_KEY") {
            self.access_key = key;
        }
        if let Ok(key) = std::env::var("DX_ADMIN_SECRET_KEY") {
            self.secret_key = key;
        }
        if let Ok(dir) = std::env::var("DX_ADMIN_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.access_key.len() < 3 {
            bail!("access key must be at least 3 characters");
        }
        if self.secret_key.len() < 8 {
            bail!("secret key must be at least 8 characters");
        }
        if self.keepalive_interval_ms == 0 {
            bail!("keepalive_interval_ms must be positive");
        }
        if self.heal.max_unconsumed_items == 0 {
            bail!("heal.max_unconsumed_items must be positive");
        }
        if self.peers.iter().any(|p| p.host == self.node_name) {
            bail!("node {} lists itself as a peer", self.node_name);
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

/// Parse `host:port[,host:port...]`
pub fn parse_peer_list(list: &str) -> Vec<PeerEndpoint> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PeerEndpoint::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AdminConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keepalive_interval(), Duration::from_secs(10));
        assert_eq!(config.heal.retention(), Duration::from_secs(600));
    }

    #[test]
    fn test_toml_overrides() {
        let config: AdminConfig = toml::from_str(
            r#"
            node_name = "node1:9000"
            keepalive_interval_ms = 250

            [[peers]]
            host = "node2:9000"

            [[peers]]
            host = "node3:9000"
            addr = "10.0.0.3:9000"

            [heal]
            retention_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[1].addr, Some("10.0.0.3:9000".parse().unwrap()));
        assert_eq!(config.heal.retention_secs, 30);
        assert_eq!(config.heal.max_unconsumed_items, 1000);
        assert_eq!(config.keepalive_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_self_peer_rejected() {
        let config = AdminConfig {
            peers: parse_peer_list("localhost:9000"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_list_and_names() {
        let peers = parse_peer_list(" a:9000, ,b.example.com:9001");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name(), "a");
        assert_eq!(peers[1].name(), "b.example.com");
        assert_eq!(PeerEndpoint::new("nohost").name(), "nohost");
    }
}
