//! Client connector
//!
//! The target URL scheme selects the transport: `grpc://` for streaming
//! cleartext, `grpcs://` for streaming TLS, `http://` for the poll
//! transport. `openagents://<network-id>` sweeps a port range for a node
//! whose health endpoint reports the wanted network id, then connects over
//! HTTP.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::core::event::Event;
use crate::error::{Error, Result};
use crate::transport::{parse_network_url, NetworkAddress};

/// Per-port timeout during a discovery sweep
const DISCOVERY_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// What the client presents when registering
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub agent_id: String,
    pub metadata: Map<String, Value>,
    pub password_hash: Option<String>,
    pub force_reconnect: bool,
    pub subscriptions: Vec<String>,
}

impl ClientConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        ClientConfig {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn with_subscriptions(mut self, patterns: Vec<String>) -> Self {
        self.subscriptions = patterns;
        self
    }
}

/// What the node granted at registration
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    pub secret: String,
    pub group: Option<String>,
    pub network_name: String,
    pub network_id: String,
}

/// A connected client, transport selected by URL scheme
pub enum Connection {
    Http(HttpConnection),
    Streaming(StreamingConnection),
}

impl Connection {
    pub fn registration(&self) -> &RegistrationInfo {
        match self {
            Connection::Http(c) => &c.info,
            Connection::Streaming(c) => &c.info,
        }
    }

    /// Send one event. The agent's secret is attached when absent.
    pub async fn send_event(&mut self, event: Event) -> Result<Value> {
        match self {
            Connection::Http(c) => c.send_event(event).await,
            Connection::Streaming(c) => c.send_event(event).await,
        }
    }

    /// Receive pending events, waiting up to `wait`.
    pub async fn next_events(&mut self, wait: Duration) -> Result<Vec<Event>> {
        match self {
            Connection::Http(c) => c.poll(wait).await,
            Connection::Streaming(c) => c.next_events(wait).await,
        }
    }

    /// Unregister (HTTP) or close the stream (streaming; the node
    /// unregisters on disconnect).
    pub async fn close(self) -> Result<()> {
        match self {
            Connection::Http(c) => c.unregister().await,
            Connection::Streaming(c) => c.close().await,
        }
    }
}

/// Connect to a network by target URL.
pub async fn connect(url: &str, config: ClientConfig) -> Result<Connection> {
    match parse_network_url(url)? {
        NetworkAddress::Http { host, port } => {
            let base = format!("http://{host}:{port}");
            Ok(Connection::Http(
                HttpConnection::connect(&base, config).await?,
            ))
        }
        NetworkAddress::Streaming { host, port, tls } => {
            let scheme = if tls { "wss" } else { "ws" };
            let target = format!("{scheme}://{host}:{port}");
            Ok(Connection::Streaming(
                StreamingConnection::connect(&target, config).await?,
            ))
        }
        NetworkAddress::Discovery { network_id } => {
            let port = discover("127.0.0.1", (8570, 8600), &network_id).await?;
            let base = format!("http://127.0.0.1:{port}");
            Ok(Connection::Http(
                HttpConnection::connect(&base, config).await?,
            ))
        }
    }
}

/// Sweep a port range for a node whose health endpoint reports the wanted
/// network id; returns the matching port.
pub async fn discover(host: &str, port_range: (u16, u16), network_id: &str) -> Result<u16> {
    let http = reqwest::Client::builder()
        .timeout(DISCOVERY_PROBE_TIMEOUT)
        .build()
        .map_err(|e| Error::Internal(e.to_string()))?;
    for port in port_range.0..=port_range.1 {
        let url = format!("http://{host}:{port}/api/health");
        let Ok(resp) = http.get(&url).send().await else {
            continue;
        };
        let Ok(body) = resp.json::<Value>().await else {
            continue;
        };
        if body["data"]["network_id"].as_str() == Some(network_id) {
            debug!(port, network_id, "network discovered");
            return Ok(port);
        }
    }
    Err(Error::UnknownAgent(format!(
        "no network with id {network_id} in {}..{}",
        port_range.0, port_range.1
    )))
}

// ============================================================================
// HTTP
// ============================================================================

/// Poll-transport client
pub struct HttpConnection {
    http: reqwest::Client,
    base: String,
    agent_id: String,
    pub info: RegistrationInfo,
}

impl HttpConnection {
    /// Register over `POST /api/register` and keep the granted secret.
    pub async fn connect(base: &str, config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let body = json!({
            "agent_id": config.agent_id,
            "metadata": config.metadata,
            "transport_type": "http",
            "force_reconnect": config.force_reconnect,
            "password_hash": config.password_hash,
            "subscriptions": config.subscriptions,
        });
        let resp: Value = http
            .post(format!("{base}/api/register"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if resp["success"] != json!(true) {
            return Err(Error::AuthenticationRequired(
                resp["error_message"].as_str().unwrap_or("unknown").to_string(),
            ));
        }
        let info = RegistrationInfo {
            secret: resp["secret"].as_str().unwrap_or_default().to_string(),
            group: resp["group"].as_str().map(str::to_string),
            network_name: resp["network_name"].as_str().unwrap_or_default().to_string(),
            network_id: resp["network_id"].as_str().unwrap_or_default().to_string(),
        };
        Ok(HttpConnection {
            http,
            base: base.to_string(),
            agent_id: config.agent_id,
            info,
        })
    }

    pub async fn send_event(&self, mut event: Event) -> Result<Value> {
        if event.secret.is_none() {
            event.secret = Some(self.info.secret.clone());
        }
        self.http
            .post(format!("{}/api/send_event", self.base))
            .json(&event)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    pub async fn poll(&self, wait: Duration) -> Result<Vec<Event>> {
        let resp: Value = self
            .http
            .get(format!("{}/api/poll", self.base))
            .query(&[
                ("agent_id", self.agent_id.as_str()),
                ("timeout", &wait.as_secs().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let messages = resp["messages"].clone();
        Ok(serde_json::from_value(messages)?)
    }

    pub async fn unregister(self) -> Result<()> {
        self.http
            .post(format!("{}/api/unregister", self.base))
            .json(&json!({"agent_id": self.agent_id, "secret": self.info.secret}))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Streaming-transport client
pub struct StreamingConnection {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    pub info: RegistrationInfo,
}

impl StreamingConnection {
    /// Open the socket, send the register frame, and read the grant.
    pub async fn connect(target: &str, config: ClientConfig) -> Result<Self> {
        let (mut ws, _) = connect_async(target)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let register = json!({
            "agent_id": config.agent_id,
            "metadata": config.metadata,
            "password_hash": config.password_hash,
            "force_reconnect": config.force_reconnect,
            "subscriptions": config.subscriptions,
        });
        ws.send(Message::Text(register.to_string()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let hello = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => {
                return Err(Error::Transport(format!(
                    "no register response: {other:?}"
                )))
            }
        };
        let hello: Value = serde_json::from_str(&hello)?;
        if hello.get("kind").and_then(Value::as_str) == Some("error") {
            return Err(Error::AuthenticationRequired(
                hello["error"].as_str().unwrap_or("unknown").to_string(),
            ));
        }
        let info = RegistrationInfo {
            secret: hello["secret"].as_str().unwrap_or_default().to_string(),
            group: hello["group"].as_str().map(str::to_string),
            network_name: hello["network_name"].as_str().unwrap_or_default().to_string(),
            network_id: hello["network_id"].as_str().unwrap_or_default().to_string(),
        };
        Ok(StreamingConnection { ws, info })
    }

    /// Push one event over the stream. Streaming sends are fire-and-forget;
    /// failures arrive as error frames.
    pub async fn send_event(&mut self, mut event: Event) -> Result<Value> {
        if event.secret.is_none() {
            event.secret = Some(self.info.secret.clone());
        }
        self.ws
            .send(Message::Text(serde_json::to_string(&event)?))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(json!({"success": true}))
    }

    /// Collect pushed events until `wait` elapses.
    pub async fn next_events(&mut self, wait: Duration) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    if let Ok(event) = serde_json::from_str::<Event>(&text) {
                        out.push(event);
                    }
                }
                Ok(Some(Ok(_))) => continue,
                Ok(_) => break,
                Err(_) => break,
            }
        }
        Ok(out)
    }

    pub async fn close(mut self) -> Result<()> {
        let _ = self.ws.close(None).await;
        Ok(())
    }
}
