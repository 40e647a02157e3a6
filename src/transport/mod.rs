//! Transport manager - wire protocols in front of the event gateway
//!
//! Two transports multiplex the same event space:
//! - **streaming**: a persistent bidirectional WebSocket carrying one
//!   `Event` JSON object per frame, pushed both ways
//! - **http**: request/poll JSON endpoints under `/api/*`
//!
//! Both present events to the gateway through the same submit path, and
//! both substitute the connection's authenticated agent id for the claimed
//! `source_id`.

pub mod http;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use url::Url;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::network::AgentNetwork;

/// Default streaming port when a target URL carries none
pub const DEFAULT_STREAMING_PORT: u16 = 8570;
/// Default HTTP port when a target URL carries none (streaming + 1000)
pub const DEFAULT_HTTP_PORT: u16 = 9570;

/// Wire protocol kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// Persistent bidirectional streaming
    #[serde(rename = "grpc", alias = "streaming")]
    Streaming,
    /// Request/poll HTTP
    #[serde(rename = "http")]
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Streaming => "grpc",
            TransportKind::Http => "http",
        }
    }
}

/// A server-side transport listener
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire protocol this listener speaks
    fn kind(&self) -> TransportKind;

    /// Bind the listener and start serving. Returns once the socket is
    /// bound; serving continues in background tasks.
    async fn listen(&self, host: &str, port: u16) -> Result<()>;

    /// Stop accepting and drop in-flight connections
    async fn shutdown(&self);
}

/// Starts and owns the configured transport listeners
#[derive(Default)]
pub struct TransportManager {
    active: Mutex<Vec<Arc<dyn Transport>>>,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every configured transport. A bind failure (port in use)
    /// aborts startup.
    pub async fn start_all(&self, config: &NetworkConfig, node: Arc<AgentNetwork>) -> Result<()> {
        let mut active = self.active.lock().await;
        for item in &config.transports {
            let (host, port) = item.bind_address(&config.host, config.port);
            let transport: Arc<dyn Transport> = match item.kind {
                TransportKind::Http => Arc::new(http::HttpTransport::new(node.clone())),
                TransportKind::Streaming => Arc::new(stream::StreamingTransport::new(node.clone())),
            };
            transport.listen(&host, port).await?;
            info!(kind = transport.kind().as_str(), %host, port, "transport listening");
            active.push(transport);
        }
        Ok(())
    }

    /// Kinds of the running transports, for the health surface
    pub async fn kinds(&self) -> Vec<String> {
        self.active
            .lock()
            .await
            .iter()
            .map(|t| t.kind().as_str().to_string())
            .collect()
    }

    /// Stop all listeners and release the node references they hold
    pub async fn shutdown_all(&self) {
        let mut active = self.active.lock().await;
        for transport in active.iter() {
            transport.shutdown().await;
        }
        active.clear();
    }
}

// ============================================================================
// Address parsing (client side)
// ============================================================================

/// Parsed network target URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAddress {
    /// `grpc://host:port` or `grpcs://host:port`
    Streaming { host: String, port: u16, tls: bool },
    /// `http://host:port`
    Http { host: String, port: u16 },
    /// `openagents://<network-id>`: sweep a configured port range for a
    /// node whose health endpoint reports this network id
    Discovery { network_id: String },
}

/// Select the client-side transport from a target URL scheme.
pub fn parse_network_url(input: &str) -> Result<NetworkAddress> {
    let url =
        Url::parse(input).map_err(|e| Error::Config(format!("invalid network url: {e}")))?;
    let host = || -> Result<String> {
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Config(format!("network url has no host: {input}")))
    };
    match url.scheme() {
        "grpc" => Ok(NetworkAddress::Streaming {
            host: host()?,
            port: url.port().unwrap_or(DEFAULT_STREAMING_PORT),
            tls: false,
        }),
        "grpcs" => Ok(NetworkAddress::Streaming {
            host: host()?,
            port: url.port().unwrap_or(DEFAULT_STREAMING_PORT),
            tls: true,
        }),
        "http" => Ok(NetworkAddress::Http {
            host: host()?,
            port: url.port().unwrap_or(DEFAULT_HTTP_PORT),
        }),
        "openagents" => Ok(NetworkAddress::Discovery {
            network_id: host()?,
        }),
        other => Err(Error::Config(format!(
            "unsupported network url scheme: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selection() {
        assert_eq!(
            parse_network_url("grpc://localhost:8570").unwrap(),
            NetworkAddress::Streaming {
                host: "localhost".to_string(),
                port: 8570,
                tls: false
            }
        );
        assert_eq!(
            parse_network_url("grpcs://example.com").unwrap(),
            NetworkAddress::Streaming {
                host: "example.com".to_string(),
                port: DEFAULT_STREAMING_PORT,
                tls: true
            }
        );
        assert_eq!(
            parse_network_url("http://localhost:8571").unwrap(),
            NetworkAddress::Http {
                host: "localhost".to_string(),
                port: 8571
            }
        );
        assert_eq!(
            parse_network_url("openagents://my-network-id").unwrap(),
            NetworkAddress::Discovery {
                network_id: "my-network-id".to_string()
            }
        );
        assert!(parse_network_url("ftp://x").is_err());
        assert!(parse_network_url("not a url").is_err());
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransportKind::Streaming).unwrap(),
            "\"grpc\""
        );
        let kind: TransportKind = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(kind, TransportKind::Streaming);
    }
}
