//! Gateway and adapter configuration
//!
//! Two YAML files: the gateway file names the local compound address and
//! the remote peers, the adapter file describes the local TUN side. Any
//! parse failure is fatal at startup.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use pathgate_net::{Ipv4Net, IsdAs, PathAddr};

use crate::error::{CoreError, CoreResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConf {
    /// Full compound address this gateway accepts handshakes on.
    pub address: PathAddr,
    /// Path to the adapter configuration file.
    pub adapter_conf_path: PathBuf,
    #[serde(default)]
    pub remotes: Vec<RemoteConf>,
    #[serde(default)]
    pub pathing: PathingConf,
}

/// One remote gateway to peer with.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteConf {
    pub address: PathAddr,
    #[serde(default)]
    pub description: String,
    /// Rendezvous AS for hidden paths towards this peer.
    #[serde(default)]
    pub rendezvous_addr: Option<IsdAs>,
}

/// Liveness and migration timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PathingConf {
    /// Interval at which keep-alive messages are sent.
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    /// Interval between timeout checks.
    #[serde(with = "humantime_serde")]
    pub keep_alive_timeout_interval: Duration,
    /// Silence after which the current path is considered dead.
    #[serde(with = "humantime_serde")]
    pub keep_alive_timeout: Duration,
    /// Grace granted to a fresh path before the first timeout check.
    #[serde(with = "humantime_serde")]
    pub migrate_grace_timeout: Duration,
}

impl Default for PathingConf {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_millis(50),
            keep_alive_timeout_interval: Duration::from_millis(30),
            keep_alive_timeout: Duration::from_millis(300),
            migrate_grace_timeout: Duration::from_millis(500),
        }
    }
}

/// IP adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdapterConf {
    /// Local subnet announced to peers after the handshake.
    pub subnet: Ipv4Net,
    /// Address assigned to the TUN device (with a /32 mask).
    pub addr: Ipv4Addr,
    #[serde(default = "default_tun_name")]
    pub tun_name: String,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    #[serde(default = "default_tx_qlen")]
    pub tx_qlen: u32,
}

fn default_tun_name() -> String {
    "tun0".to_string()
}

fn default_mtu() -> u16 {
    1200
}

fn default_tx_qlen() -> u32 {
    1000
}

impl GatewayConf {
    pub fn from_yaml(raw: &str) -> CoreResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))
    }
}

impl AdapterConf {
    pub fn from_yaml(raw: &str) -> CoreResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))
    }
}
