//! Core configuration types
//!
//! The network config file is YAML; see `io.rs` for loading and
//! `validation.rs` for the rules applied before a node starts.

pub mod group;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use group::AgentGroupConfig;
pub use transport::{TlsConfig, TransportConfigItem, TransportEndpoint};

/// Topology mode of the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Single coordinating node (the only mode this crate implements)
    #[default]
    Centralized,
}

/// One mod to load at startup, in pipeline order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModConfigItem {
    /// Dotted mod path (e.g. `messaging`)
    pub name: String,
    /// Mod-private configuration
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Presentation metadata for the network, surfaced on the health endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Free-form readme text shown to connecting agents
    #[serde(default)]
    pub readme: Option<String>,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
    /// Arbitrary profile fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Tunable resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-mod, per-event processor timeout
    #[serde(default = "default_mod_timeout", with = "humantime_serde")]
    pub mod_timeout: Duration,
    /// Overall deadline for the send endpoint
    #[serde(default = "default_send_deadline", with = "humantime_serde")]
    pub send_deadline: Duration,
    /// Upper bound the poll endpoint will wait for events
    #[serde(default = "default_max_poll_wait", with = "humantime_serde")]
    pub max_poll_wait: Duration,
    /// Poll queue capacity; oldest events are dropped beyond it
    #[serde(default = "default_poll_queue_cap")]
    pub poll_queue_cap: usize,
    /// Streaming writer watermark; the connection is dropped beyond it
    #[serde(default = "default_stream_watermark")]
    pub stream_watermark: usize,
}

fn default_mod_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_send_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_max_poll_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_queue_cap() -> usize {
    1000
}

fn default_stream_watermark() -> usize {
    256
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            mod_timeout: default_mod_timeout(),
            send_deadline: default_send_deadline(),
            max_poll_wait: default_max_poll_wait(),
            poll_queue_cap: default_poll_queue_cap(),
            stream_watermark: default_stream_watermark(),
        }
    }
}

/// Top-level network node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, returned to agents on registration
    pub name: String,
    /// Topology mode
    #[serde(default)]
    pub mode: NetworkMode,
    /// Default bind host for transports that do not specify one
    #[serde(default = "default_host")]
    pub host: String,
    /// Default bind port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transports to start, each on its own listener
    #[serde(default)]
    pub transports: Vec<TransportConfigItem>,
    /// Mods to load at startup, in pipeline order
    #[serde(default)]
    pub mods: Vec<ModConfigItem>,
    /// Named groups with password hashes
    #[serde(default)]
    pub agent_groups: HashMap<String, AgentGroupConfig>,
    /// Group for agents that omit or fail password authentication
    #[serde(default = "default_agent_group")]
    pub default_agent_group: String,
    /// Reject registrations that do not match a configured group hash
    #[serde(default)]
    pub requires_password: bool,
    /// Skip secret verification on inbound events. Honored only when the
    /// crate is built with the `insecure-auth` feature; a configuration
    /// error otherwise.
    #[serde(default)]
    pub disable_agent_secret_verification: bool,
    /// TLS material for the streaming listener
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Presentation metadata
    #[serde(default)]
    pub network_profile: Option<NetworkProfile>,
    /// Workspace root; defaults to the per-user data directory
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    /// Port range swept by `openagents://` discovery clients
    #[serde(default)]
    pub discovery_port_range: Option<(u16, u16)>,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8570
}

fn default_agent_group() -> String {
    "default".to_string()
}

impl NetworkConfig {
    /// Minimal config for embedding and tests: one HTTP transport on the
    /// given port, no groups beyond the default.
    pub fn minimal(name: impl Into<String>, port: u16) -> Self {
        NetworkConfig {
            name: name.into(),
            mode: NetworkMode::Centralized,
            host: default_host(),
            port,
            transports: vec![TransportConfigItem::http("127.0.0.1", port)],
            mods: Vec::new(),
            agent_groups: HashMap::new(),
            default_agent_group: default_agent_group(),
            requires_password: false,
            disable_agent_secret_verification: false,
            tls: None,
            network_profile: None,
            workspace_path: None,
            discovery_port_range: None,
            limits: LimitsConfig::default(),
        }
    }

    /// Readme text from the network profile, if configured
    pub fn readme(&self) -> Option<&str> {
        self.network_profile.as_ref()?.readme.as_deref()
    }
}
