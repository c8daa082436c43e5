use deepmine_core::DEFAULT_MAP_SIZE;
use deepmine_net::discovery::{
    DiscoveryConfig, DEFAULT_DISCOVERY_PORT, DEFAULT_GAME_PORT, DIRECTORY_PROTOCOL_TAG,
};
use deepmine_net::{BAND_HEIGHT, COLUMN_DEPTH};
use deepmine_server::HostSettings;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};
use tracing::warn;

pub const DEFAULT_CLIENT_PATH: &str = "config/client.toml";
pub const DEFAULT_SERVER_PATH: &str = "config/server.toml";

/// Settings for `browse` and `join`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Name shown to other players.
    pub handle: String,
    /// Plaintext host directory; empty disables it.
    pub directory_url: String,
    /// Wall-clock budget for discovery in milliseconds.
    pub discovery_budget_ms: u64,
    /// Port LAN discovery queries are sent to.
    pub lan_port: u16,
    /// Game port assumed for directory entries.
    pub game_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handle: "miner".to_string(),
            directory_url: String::new(),
            discovery_budget_ms: 500,
            lan_port: DEFAULT_DISCOVERY_PORT,
            game_port: DEFAULT_GAME_PORT,
        }
    }
}

impl ClientConfig {
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            budget: Duration::from_millis(self.discovery_budget_ms),
            lan_target: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                self.lan_port,
            )),
            directory_url: (!self.directory_url.is_empty()).then(|| self.directory_url.clone()),
            protocol_tag: DIRECTORY_PROTOCOL_TAG.to_string(),
            game_port: self.game_port,
        }
    }
}

/// Settings for `host`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub server_name: String,
    /// QUIC listen address.
    pub bind_address: SocketAddr,
    pub max_players: usize,
    pub map_size: usize,
    /// Address printed in the directory line; empty skips it.
    pub public_host: String,
    pub extra: String,
    /// Answer LAN discovery queries.
    pub lan_discovery: bool,
    pub lan_port: u16,
    /// Banned IP addresses.
    pub banned: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server_name: "deepmine".to_string(),
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_GAME_PORT),
            max_players: 16,
            map_size: DEFAULT_MAP_SIZE,
            public_host: String::new(),
            extra: String::new(),
            lan_discovery: true,
            lan_port: DEFAULT_DISCOVERY_PORT,
            banned: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Host settings; unparsable ban entries are skipped with a warning.
    pub fn settings(&self) -> HostSettings {
        let banned = self
            .banned
            .iter()
            .filter_map(|entry| match entry.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(err) => {
                    warn!("Ignoring ban entry {entry:?}: {err}");
                    None
                }
            })
            .collect();
        HostSettings {
            server_name: self.server_name.clone(),
            max_players: self.max_players,
            map_size: self.map_size.clamp(BAND_HEIGHT, COLUMN_DEPTH),
            extra: self.extra.clone(),
            banned,
        }
    }
}

/// Load a TOML config, falling back to defaults on errors.
pub fn load_or_default<T>(path: &Path, default_path: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<T>(&contents) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Failed to parse {}: {err}. Using defaults", path.display());
                T::default()
            }
        },
        Err(err) => {
            if path != Path::new(default_path) || err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
            }
            T::default()
        }
    }
}
