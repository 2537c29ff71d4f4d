//! Hub configuration file

use anyhow::{bail, Context, Result};
use mocap_core::{Hrri, DEFAULT_BROKER_PORT, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_TX_PORT};
use mocap_link::resolver::DEFAULT_IP_SERVICE;
use mocap_link::{BrokerConfig, RetryPolicy};
use mocap_router::MonitorConfig;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level `mocap-hub` configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// This room's location token
    pub location: String,
    /// Socket used for sends to local consumers
    pub local_bind: String,
    /// Local consumers registered at startup
    pub receivers: Vec<ReceiverConfig>,
    pub peer: PeerConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            location: "HUB".to_string(),
            local_bind: "0.0.0.0:0".to_string(),
            receivers: Vec::new(),
            peer: PeerConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn from_toml(data: &str) -> Result<Self> {
        toml::from_str(data).context("Invalid hub configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("In {}", path.display()))
    }
}

/// A local consumer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    pub ip: String,
    pub port: u16,
    pub hrri: String,
}

impl ReceiverConfig {
    /// Endpoint and identifier, or why the entry is unusable
    pub fn resolve(&self) -> Result<(SocketAddr, Hrri)> {
        let ip: IpAddr = self
            .ip
            .parse()
            .with_context(|| format!("invalid receiver ip {:?}", self.ip))?;
        if self.port == 0 {
            bail!("receiver {} has port 0", self.ip);
        }
        if !Hrri::is_well_formed(&self.hrri) {
            bail!("receiver {}:{} has malformed hrri {:?}", self.ip, self.port, self.hrri);
        }
        Ok((SocketAddr::new(ip, self.port), Hrri::parse(&self.hrri)))
    }
}

/// Link to a remote room
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub tx_port: u16,
    pub public_ip_url: String,
    /// Send heartbeats and watch the remote ones
    pub keepalive: bool,
    pub heartbeat_interval_ms: u64,
    /// Location token of the remote room, for logs and registration
    pub remote_location: Option<String>,
    /// Give up the rendezvous after this many attempts (unbounded if unset)
    pub rendezvous_attempts: Option<u32>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: String::new(),
            broker_port: DEFAULT_BROKER_PORT,
            tx_port: DEFAULT_TX_PORT,
            public_ip_url: DEFAULT_IP_SERVICE.to_string(),
            keepalive: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            remote_location: None,
            rendezvous_attempts: None,
        }
    }
}

impl PeerConfig {
    /// Link monitor settings; broker settings are checked by
    /// [`BrokerConfig::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.keepalive && self.heartbeat_interval_ms == 0 {
            bail!("peer.heartbeat_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            broker_host: self.broker_host.clone(),
            broker_port: self.broker_port,
            tx_port: self.tx_port,
            retry: RetryPolicy {
                max_attempts: self.rendezvous_attempts,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            keepalive: self.keepalive,
        }
    }

    /// Identifier the remote room is registered under
    pub fn remote_hrri(&self) -> Hrri {
        let location = self.remote_location.as_deref().unwrap_or("PEER");
        Hrri::new(location, "PEER", "LINK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = HubConfig::from_toml("").unwrap();
        assert_eq!(config.location, "HUB");
        assert_eq!(config.local_bind, "0.0.0.0:0");
        assert!(config.receivers.is_empty());
        assert!(!config.peer.enabled);
        assert_eq!(config.peer.broker_port, DEFAULT_BROKER_PORT);
        assert_eq!(config.peer.public_ip_url, DEFAULT_IP_SERVICE);
    }

    #[test]
    fn test_full_config() {
        let config = HubConfig::from_toml(
            r#"
            location = "MUC"
            local_bind = "0.0.0.0:4000"

            [[receivers]]
            ip = "127.0.0.1"
            port = 5000
            hrri = "MUC-VIS-UNITY"

            [[receivers]]
            ip = "192.168.1.20"
            port = 5001
            hrri = "MUC-REC-DISK-1"

            [peer]
            enabled = true
            broker_host = "broker.example.org"
            tx_port = 30000
            keepalive = false
            heartbeat_interval_ms = 2000
            remote_location = "ESS"
            rendezvous_attempts = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.location, "MUC");
        assert_eq!(config.receivers.len(), 2);

        let (endpoint, hrri) = config.receivers[1].resolve().unwrap();
        assert_eq!(endpoint, "192.168.1.20:5001".parse().unwrap());
        assert_eq!(hrri.variant(), Some("1"));

        let broker = config.peer.broker_config();
        assert_eq!(broker.broker_host, "broker.example.org");
        assert_eq!(broker.broker_port, DEFAULT_BROKER_PORT);
        assert_eq!(broker.rx_port(), 30001);
        assert_eq!(broker.retry.max_attempts, Some(20));
        assert!(broker.validate().is_ok());

        let monitor = config.peer.monitor_config();
        assert!(!monitor.keepalive);
        assert_eq!(monitor.watchdog_threshold(), Duration::from_secs(4));

        assert_eq!(config.peer.remote_hrri().location(), "ESS");
    }

    #[test]
    fn test_invalid_receivers() {
        let receiver = |ip: &str, port: u16, hrri: &str| ReceiverConfig {
            ip: ip.to_string(),
            port,
            hrri: hrri.to_string(),
        };

        assert!(receiver("127.0.0.1", 5000, "MUC-VIS-UNITY").resolve().is_ok());
        assert!(receiver("localhost", 5000, "MUC-VIS-UNITY").resolve().is_err());
        assert!(receiver("127.0.0.1", 0, "MUC-VIS-UNITY").resolve().is_err());
        assert!(receiver("127.0.0.1", 5000, "muc-vis").resolve().is_err());
    }

    #[test]
    fn test_enabled_peer_without_host_fails_validation() {
        let config = HubConfig::from_toml("[peer]\nenabled = true\n").unwrap();
        assert!(config.peer.broker_config().validate().is_err());
    }

    #[test]
    fn test_zero_heartbeat_interval_rejected() {
        let config = HubConfig::from_toml("[peer]\nheartbeat_interval_ms = 0\n").unwrap();
        assert!(config.peer.validate().is_err());
        assert!(config.peer.monitor_config().validate().is_err());

        let config =
            HubConfig::from_toml("[peer]\nheartbeat_interval_ms = 0\nkeepalive = false\n")
                .unwrap();
        assert!(config.peer.validate().is_ok());
        assert!(HubConfig::default().peer.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(HubConfig::from_toml("locaton = \"MUC\"").is_err());
    }
}
