//! Load daemon config from file and environment.

use std::path::PathBuf;

use flood_core::NodeRole;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/floodnet/config.toml or
/// /etc/floodnet/config.toml. Env overrides: FLOODNET_ROLE,
/// FLOODNET_DEVICE_NAME, FLOODNET_MIN_PEERS, FLOODNET_CHANNEL,
/// FLOODNET_LINK_PORT, FLOODNET_STATUS_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Role this node plays (default leaf).
    #[serde(default = "default_role")]
    pub role: NodeRole,
    /// Name announced in discovery messages. Defaults per role.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Peers the coordinator needs before the network counts as ready.
    #[serde(default = "default_min_peers")]
    pub min_peers: u8,
    /// Radio channel identifier, forwarded to the link.
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// UDP port the simulated radio link broadcasts on (default 45700).
    #[serde(default = "default_link_port")]
    pub link_port: u16,
    /// Status HTTP port, coordinator only (default 8080).
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    /// Seconds between leaf sensor reports (default 10).
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Water level that raises a warning, in cm (default 10).
    #[serde(default = "default_water_warning_cm")]
    pub water_warning_cm: f32,
    /// Water level that raises a critical alert, in cm (default 20).
    #[serde(default = "default_water_critical_cm")]
    pub water_critical_cm: f32,
}

fn default_role() -> NodeRole {
    NodeRole::Leaf
}
fn default_min_peers() -> u8 {
    1
}
fn default_channel() -> u8 {
    1
}
fn default_link_port() -> u16 {
    45700
}
fn default_status_port() -> u16 {
    8080
}
fn default_sample_interval_secs() -> u64 {
    10
}
fn default_water_warning_cm() -> f32 {
    10.0
}
fn default_water_critical_cm() -> f32 {
    20.0
}

impl Default for Config {
    fn default() -> Self {
        Config {
            role: default_role(),
            device_name: None,
            min_peers: default_min_peers(),
            channel: default_channel(),
            link_port: default_link_port(),
            status_port: default_status_port(),
            sample_interval_secs: default_sample_interval_secs(),
            water_warning_cm: default_water_warning_cm(),
            water_critical_cm: default_water_critical_cm(),
        }
    }
}

impl Config {
    /// Announced device name, defaulting per role.
    pub fn resolved_device_name(&self) -> String {
        match &self.device_name {
            Some(name) => name.clone(),
            None => match self.role {
                NodeRole::Coordinator => "AlertStation".to_string(),
                NodeRole::Leaf => "WaterSensor".to_string(),
            },
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("FLOODNET_ROLE") {
        match s.to_ascii_lowercase().as_str() {
            "coordinator" => c.role = NodeRole::Coordinator,
            "leaf" => c.role = NodeRole::Leaf,
            other => tracing::warn!(role = other, "unrecognized FLOODNET_ROLE, keeping config"),
        }
    }
    if let Ok(s) = std::env::var("FLOODNET_DEVICE_NAME") {
        if !s.is_empty() {
            c.device_name = Some(s);
        }
    }
    if let Ok(s) = std::env::var("FLOODNET_MIN_PEERS") {
        if let Ok(n) = s.parse::<u8>() {
            c.min_peers = n;
        }
    }
    if let Ok(s) = std::env::var("FLOODNET_CHANNEL") {
        if let Ok(n) = s.parse::<u8>() {
            c.channel = n;
        }
    }
    if let Ok(s) = std::env::var("FLOODNET_LINK_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.link_port = p;
        }
    }
    if let Ok(s) = std::env::var("FLOODNET_STATUS_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.status_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/floodnet/config.toml"));
    }
    out.push(PathBuf::from("/etc/floodnet/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(err) => tracing::warn!(path = %p.display(), error = %err, "bad config file"),
                }
            }
            break;
        }
    }
    None
}
