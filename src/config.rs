//! Hub and client configuration.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment key holding the shared relay secret.
pub const RELAY_PASSWORD_KEY: &str = "RELAY_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared relay secret. `None` disables the relay data plane end-to-end.
    #[serde(default)]
    pub relay_password: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            relay_password: None,
        }
    }
}

impl HubConfig {
    /// Build a config from the process environment. An empty
    /// `RELAY_PASSWORD` counts as unset.
    pub fn from_env() -> Self {
        Self {
            bind_address: default_bind_address(),
            relay_password: env::var(RELAY_PASSWORD_KEY).ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Load `KEY=VALUE` lines from an env file into the process environment.
/// Existing variables win over file entries. Returns the number of
/// variables set.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<usize> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read env file {}", path.as_ref().display()))?;

    let mut loaded = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        if !key.is_empty() && env::var(key).is_err() {
            env::set_var(key, value);
            loaded += 1;
        }
    }
    Ok(loaded)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signaling hub URL, e.g. `ws://localhost:8080`.
    pub signaling_url: String,
    /// Requested identity; empty or taken requests get a synthesized one.
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    #[serde(default)]
    pub turn_servers: Vec<TurnServer>,
    /// Signaling connect timeout; also bounds relay authentication.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Direct peer negotiation timeout.
    #[serde(default = "default_peer_connect_timeout_ms")]
    pub peer_connect_timeout_ms: u64,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl ClientConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            peer_id: None,
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
            connection_timeout_ms: default_connection_timeout_ms(),
            peer_connect_timeout_ms: default_peer_connect_timeout_ms(),
            auto_reconnect: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }

    /// Resolved ICE servers for a peer-transport implementation: plain STUN
    /// URLs followed by TURN entries with credentials.
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers: Vec<IceServer> = self
            .stun_servers
            .iter()
            .map(|url| IceServer {
                url: url.clone(),
                username: None,
                credential: None,
            })
            .collect();
        for turn in &self.turn_servers {
            if TurnAddress::parse(&turn.url).is_some() {
                servers.push(IceServer {
                    url: turn.url.clone(),
                    username: Some(turn.username.clone()),
                    credential: Some(turn.credential.clone()),
                });
            }
        }
        servers
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("ws://localhost:8080")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IceServer {
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// A parsed `turn[s]:<host>[:<port>]` URL. Port defaults to 3478 (UDP) or
/// 5349 (TLS).
#[derive(Debug, Clone, PartialEq)]
pub struct TurnAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl TurnAddress {
    pub fn parse(url: &str) -> Option<Self> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("turns:") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("turn:") {
            (false, rest)
        } else {
            return None;
        };

        let default_port = if tls { 5349 } else { 3478 };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().unwrap_or(default_port)),
            None => (rest, default_port),
        };

        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_peer_connect_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}
