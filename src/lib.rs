//! # OpenAgents Network Node
//!
//! A distributed multi-agent coordination substrate: independent agent
//! processes register with this node, address one another by logical
//! identity, publish into topic channels, and collaborate through
//! pluggable mods.
//!
//! ## Architecture
//!
//! Five layers, bottom-up:
//!
//! - **Workspace store** (`workspace`): crash-safe record of events,
//!   agents, group membership, per-mod state, and LLM call logs
//! - **Event gateway** (`gateway`): stamps, authenticates, classifies,
//!   routes, and delivers every [`Event`]
//! - **Mod registry & pipeline** (`mods`): ordered middleware chain with
//!   dynamic load/unload
//! - **Transport manager** (`transport`): streaming and HTTP-poll wire
//!   protocols in front of the same event space
//! - **Auth & group manager** (`auth`): secret issuance and group
//!   assignment by password hash
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openagents_node::config::NetworkConfig;
//! use openagents_node::network::AgentNetwork;
//! use openagents_node::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = NetworkConfig::minimal("MyNetwork", 8570);
//!     let node = AgentNetwork::create(config).await?;
//!     node.start().await?;
//!     // ... node serves until shutdown
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

// Auth & group manager
pub mod auth;

// Client connector (scheme-selected transport, discovery)
pub mod client;

// Modular configuration
pub mod config;

// Core types: Event envelope, responses, mod-facing context
pub mod core;

// Error types
pub mod error;

// Event gateway: submit, subscriptions, queues, channels
pub mod gateway;

// Mod registry, pipeline, and built-in mods
pub mod mods;

// The composition root
pub mod network;

// Transport manager and wire protocols
pub mod transport;

// Workspace persistence
pub mod workspace;

// Re-export commonly used items
pub use error::{Error, Result};

pub use auth::{hash_password, AuthManager, RegistrationRequest};
pub use core::{Event, EventClass, EventResponse, NetworkContext, Visibility};
pub use gateway::{EventGateway, SubmitOutcome};
pub use mods::{ModOutcome, ModRegistry, NetworkMod};
pub use network::AgentNetwork;
pub use transport::{parse_network_url, NetworkAddress, TransportKind};
pub use workspace::WorkspaceStore;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
