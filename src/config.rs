//! Runtime configuration for the three roles.
//!
//! Values are resolved once at startup (JSON file, then command-line
//! overrides) and passed into the services; nothing reads the environment
//! while serving requests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Repository (authoritative store) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Address both listeners bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// TCP port the Manager forwards commands to.
    #[serde(default = "default_repository_tcp_port")]
    pub tcp_port: u16,
    /// UDP port for discovery, LIST and STATS.
    #[serde(default = "default_repository_udp_port")]
    pub udp_port: u16,
    /// Manager TCP port announced in discovery replies.
    #[serde(default = "default_manager_tcp_port")]
    pub manager_port: u16,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

/// Manager (router + shadow lock table) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// TCP port clients connect to.
    #[serde(default = "default_manager_tcp_port")]
    pub tcp_port: u16,
    /// UDP port of the STATS relay.
    #[serde(default = "default_manager_udp_port")]
    pub udp_port: u16,
    /// Repository TCP endpoint.
    #[serde(default = "default_repository_addr")]
    pub repository_addr: SocketAddr,
    /// Budget for one upstream round trip, connect included.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Consult the shadow lock table before forwarding OPEN.
    #[serde(default = "default_shadow_locks")]
    pub shadow_locks: bool,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

/// Client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Repository UDP endpoint used for discovery and queries.
    #[serde(default = "default_repository_udp_addr")]
    pub repository_udp_addr: SocketAddr,
    /// Host of the Manager; the port comes from discovery.
    #[serde(default = "default_host")]
    pub manager_host: IpAddr,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection attempts made by a reconnect before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

/// Whole-deployment configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Loads a JSON configuration file. Missing sections and fields take
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

impl RepositoryConfig {
    pub fn tcp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn udp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// Loopback config with OS-assigned ports.
    pub fn for_testing() -> Self {
        Self {
            host: default_host(),
            tcp_port: 0,
            udp_port: 0,
            manager_port: 0,
            stats_interval_secs: 3600,
        }
    }
}

impl ManagerConfig {
    pub fn tcp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn udp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// Loopback config with OS-assigned ports pointing at `repository_addr`.
    pub fn for_testing(repository_addr: SocketAddr) -> Self {
        Self {
            host: default_host(),
            tcp_port: 0,
            udp_port: 0,
            repository_addr,
            upstream_timeout_ms: 1_000,
            shadow_locks: true,
            stats_interval_secs: 3600,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn for_testing(repository_udp_addr: SocketAddr) -> Self {
        Self {
            repository_udp_addr,
            manager_host: default_host(),
            request_timeout_ms: 2_000,
            reconnect_attempts: 3,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_repository_tcp_port() -> u16 {
    19100
}

fn default_repository_udp_port() -> u16 {
    19000
}

fn default_manager_tcp_port() -> u16 {
    19010
}

fn default_manager_udp_port() -> u16 {
    19011
}

fn default_repository_addr() -> SocketAddr {
    SocketAddr::new(default_host(), default_repository_tcp_port())
}

fn default_repository_udp_addr() -> SocketAddr {
    SocketAddr::new(default_host(), default_repository_udp_port())
}

fn default_upstream_timeout_ms() -> u64 {
    3_000
}

fn default_shadow_locks() -> bool {
    true
}

fn default_stats_interval_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_attempts() -> u32 {
    3
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_repository_tcp_port(),
            udp_port: default_repository_udp_port(),
            manager_port: default_manager_tcp_port(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_manager_tcp_port(),
            udp_port: default_manager_udp_port(),
            repository_addr: default_repository_addr(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            shadow_locks: default_shadow_locks(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            repository_udp_addr: default_repository_udp_addr(),
            manager_host: default_host(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}
