//! Configuration loading and validation

use anyhow::Result;
use lanwake_core::{ScanRange, ServiceConfig, DEFAULT_WAKE_BROADCAST, DEFAULT_WAKE_PORT};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub beacon: BeaconConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the REST API
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnet to probe
    #[serde(default = "default_subnet")]
    pub subnet: Ipv4Addr,
    /// Subnet prefix length
    #[serde(default = "default_prefix")]
    pub prefix_len: u8,
    /// How long a probe waits for replies
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Interface to probe from; picked automatically when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet: default_subnet(),
            prefix_len: default_prefix(),
            probe_timeout_ms: default_probe_timeout_ms(),
            interface: None,
        }
    }
}

fn default_subnet() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 0)
}

fn default_prefix() -> u8 {
    24
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path to the device registry file
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("./devices.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    /// Destination used when a request names none
    #[serde(default = "default_wake_broadcast")]
    pub broadcast: Ipv4Addr,
    /// UDP port used when a request names none
    #[serde(default = "default_wake_port")]
    pub port: u16,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            broadcast: default_wake_broadcast(),
            port: default_wake_port(),
        }
    }
}

fn default_wake_broadcast() -> Ipv4Addr {
    DEFAULT_WAKE_BROADCAST
}

fn default_wake_port() -> u16 {
    DEFAULT_WAKE_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Listen for agent beacons
    #[serde(default)]
    pub enabled: bool,
    /// Multicast group the agents send to
    #[serde(default = "default_beacon_group")]
    pub group: Ipv4Addr,
    #[serde(default = "default_beacon_port")]
    pub port: u16,
    /// Local interface address used to join the group
    #[serde(default = "default_beacon_interface")]
    pub interface: Ipv4Addr,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: default_beacon_group(),
            port: default_beacon_port(),
            interface: default_beacon_interface(),
        }
    }
}

fn default_beacon_group() -> Ipv4Addr {
    Ipv4Addr::new(224, 1, 1, 1)
}

fn default_beacon_port() -> u16 {
    5007
}

fn default_beacon_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Config {
    /// Convert to the service settings used by `DeviceService`
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            range: ScanRange::new(self.discovery.subnet, self.discovery.prefix_len),
            probe_timeout: Duration::from_millis(self.discovery.probe_timeout_ms),
            wake_broadcast: self.wake.broadcast,
            wake_port: self.wake.port,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
