//! Configuration validation
//!
//! Rules applied once at load time so a misconfigured node fails before
//! binding any listener (exit code 1).

use crate::error::{Error, Result};

use super::types::NetworkConfig;

/// Validate a network configuration.
pub fn validate_config(config: &NetworkConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::Config("network name must not be empty".to_string()));
    }

    if config.transports.is_empty() {
        return Err(Error::Config(
            "at least one transport must be configured".to_string(),
        ));
    }

    let mut ports = Vec::new();
    for item in &config.transports {
        let (_, port) = item.bind_address(&config.host, config.port);
        if ports.contains(&port) {
            return Err(Error::Config(format!(
                "transport port {port} is configured more than once"
            )));
        }
        ports.push(port);
    }

    for (name, group) in &config.agent_groups {
        if group.password_hash.trim().is_empty() {
            return Err(Error::Config(format!(
                "agent group '{name}' has an empty password_hash"
            )));
        }
    }

    if config.agent_groups.contains_key(&config.default_agent_group) {
        return Err(Error::Config(format!(
            "default_agent_group '{}' must not be a password-protected group",
            config.default_agent_group
        )));
    }

    if let Some((start, end)) = config.discovery_port_range {
        if start > end {
            return Err(Error::Config(format!(
                "discovery_port_range start {start} exceeds end {end}"
            )));
        }
    }

    #[cfg(not(feature = "insecure-auth"))]
    if config.disable_agent_secret_verification {
        return Err(Error::Config(
            "disable_agent_secret_verification requires a build with the \
             `insecure-auth` feature"
                .to_string(),
        ));
    }

    if let Some(tls) = &config.tls {
        if !tls.cert_path.exists() {
            return Err(Error::Config(format!(
                "tls cert_path does not exist: {}",
                tls.cert_path.display()
            )));
        }
        if !tls.key_path.exists() {
            return Err(Error::Config(format!(
                "tls key_path does not exist: {}",
                tls.key_path.display()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AgentGroupConfig, NetworkConfig};

    #[test]
    fn test_duplicate_ports_rejected() {
        let mut config = NetworkConfig::minimal("TestNet", 8570);
        config
            .transports
            .push(crate::config::types::TransportConfigItem::streaming(
                "127.0.0.1",
                8570,
            ));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_default_group_must_be_open() {
        let mut config = NetworkConfig::minimal("TestNet", 8570);
        config.default_agent_group = "admins".to_string();
        config.agent_groups.insert(
            "admins".to_string(),
            AgentGroupConfig {
                password_hash: "h".to_string(),
                description: None,
                metadata: Default::default(),
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[cfg(not(feature = "insecure-auth"))]
    #[test]
    fn test_insecure_flag_rejected_in_default_build() {
        let mut config = NetworkConfig::minimal("TestNet", 8570);
        config.disable_agent_secret_verification = true;
        assert!(validate_config(&config).is_err());
    }
}
