//! Transport listener configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::transport::TransportKind;

/// Bind address for a single transport listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportEndpoint {
    /// Bind host; falls back to the network-level host
    #[serde(default)]
    pub host: Option<String>,
    /// Bind port; falls back to the network-level port
    #[serde(default)]
    pub port: Option<u16>,
}

/// One transport to start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfigItem {
    /// Transport kind (`grpc` for streaming, `http` for poll)
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Listener address
    #[serde(default)]
    pub config: TransportEndpoint,
}

impl TransportConfigItem {
    /// HTTP poll transport on the given address
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        TransportConfigItem {
            kind: TransportKind::Http,
            config: TransportEndpoint {
                host: Some(host.into()),
                port: Some(port),
            },
        }
    }

    /// Streaming transport on the given address
    pub fn streaming(host: impl Into<String>, port: u16) -> Self {
        TransportConfigItem {
            kind: TransportKind::Streaming,
            config: TransportEndpoint {
                host: Some(host.into()),
                port: Some(port),
            },
        }
    }

    /// Resolved bind address, with network-level fallbacks
    pub fn bind_address(&self, default_host: &str, default_port: u16) -> (String, u16) {
        (
            self.config
                .host
                .clone()
                .unwrap_or_else(|| default_host.to_string()),
            self.config.port.unwrap_or(default_port),
        )
    }
}

/// TLS material for the streaming listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
    /// Require client certificates (mTLS)
    #[serde(default)]
    pub require_client_cert: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address_fallbacks() {
        let item = TransportConfigItem {
            kind: TransportKind::Http,
            config: TransportEndpoint {
                host: None,
                port: Some(9000),
            },
        };
        assert_eq!(
            item.bind_address("0.0.0.0", 8570),
            ("0.0.0.0".to_string(), 9000)
        );
    }

    #[test]
    fn test_kind_aliases() {
        let item: TransportConfigItem =
            serde_json::from_str(r#"{"type": "grpc", "config": {"port": 8570}}"#).unwrap();
        assert_eq!(item.kind, TransportKind::Streaming);
    }
}
