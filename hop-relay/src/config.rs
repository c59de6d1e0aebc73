//! Load relay config from file and environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use hop_core::DirectoryConfig;
use serde::Deserialize;

/// Relay configuration. File: ~/.config/hop/relay.toml or /etc/hop/relay.toml.
/// Env overrides: HOP_BIND_ADDR, HOP_RELAY_PORT, HOP_HEALTH_PORT, HOP_IDLE_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Listen address for both ports (default 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Signaling TCP port (default 3001).
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    /// HTTP health port (default 3002).
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Session expiry policy.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_relay_port() -> u16 {
    3001
}
fn default_health_port() -> u16 {
    3002
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            relay_port: default_relay_port(),
            health_port: default_health_port(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.relay_port)
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.health_port)
    }

    /// Apply env overrides from `lookup`. Unparseable values are logged and ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_env(&lookup, "HOP_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = parse_env(&lookup, "HOP_RELAY_PORT") {
            self.relay_port = v;
        }
        if let Some(v) = parse_env(&lookup, "HOP_HEALTH_PORT") {
            self.health_port = v;
        }
        if let Some(v) = parse_env(&lookup, "HOP_IDLE_TIMEOUT_SECS") {
            self.directory.idle_timeout_secs = v;
        }
    }
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

/// Load config: default, then the first config file found, then env vars.
/// An explicit `path` must exist and parse.
pub fn load(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let mut c = match path {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => RelayConfig::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/hop/relay.toml"));
    }
    out.push(PathBuf::from("/etc/hop/relay.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<RelayConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let c = toml::from_str::<RelayConfig>(&s)
        .with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded config");
    Ok(c)
}
