//! Configuration loading
//!
//! Network configs are YAML files loaded through the `config` crate, with
//! environment overrides under the `OPENAGENTS` prefix
//! (e.g. `OPENAGENTS__PORT=9000`).

use std::path::Path;

use crate::error::Result;

use super::types::NetworkConfig;
use super::validation::validate_config;

/// Load and validate a network configuration from a YAML file.
pub fn load_network_config(path: impl AsRef<Path>) -> Result<NetworkConfig> {
    let path = path.as_ref();
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("OPENAGENTS")
                .separator("__")
                .try_parsing(true),
        );

    let config: NetworkConfig = builder.build()?.try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a network configuration from a YAML string. Used by tests and
/// embedding processes that assemble configs programmatically.
pub fn parse_network_config(yaml: &str) -> Result<NetworkConfig> {
    let config: NetworkConfig = config::Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}
