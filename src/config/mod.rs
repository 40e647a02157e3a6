//! Configuration module - network node configuration
//!
//! Split into focused modules:
//! - types/mod.rs: NetworkConfig and resource limits
//! - types/group.rs: agent group configuration
//! - types/transport.rs: transport listener and TLS configuration
//! - io.rs: YAML loading with environment overrides
//! - validation.rs: load-time validation rules
//! - paths.rs: default workspace and config file locations

mod io;
mod paths;
mod types;
mod validation;

pub use types::{
    AgentGroupConfig, LimitsConfig, ModConfigItem, NetworkConfig, NetworkMode, NetworkProfile,
    TlsConfig, TransportConfigItem, TransportEndpoint,
};

pub use io::{load_network_config, parse_network_config};
pub use paths::{default_config_path, default_workspace_dir};
pub use validation::validate_config;
