//! Streaming transport
//!
//! A persistent bidirectional WebSocket per agent. The first client text
//! frame is the register frame; the first server frame answers with
//! `{secret, network_name, network_id}`. Every frame after that, in either
//! direction, is one `Event` JSON object.
//!
//! The server substitutes the connection's registered agent id as
//! `source_id` on every inbound event, so a client cannot speak for
//! another agent. A writer backed up past the configured watermark drops
//! the connection, and a dropped connection unregisters the agent.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::auth::RegistrationRequest;
use crate::core::event::{Event, AGENT_PREFIX};
use crate::error::{Error, Result};
use crate::network::AgentNetwork;

use super::{Transport, TransportKind};

/// Register frame, the first client frame on a fresh connection
#[derive(Debug, Deserialize)]
struct RegisterFrame {
    agent_id: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    password_hash: Option<String>,
    #[serde(default)]
    force_reconnect: bool,
    #[serde(default)]
    subscriptions: Vec<String>,
}

/// The streaming transport listener
pub struct StreamingTransport {
    node: Arc<AgentNetwork>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingTransport {
    pub fn new(node: Arc<AgentNetwork>) -> Self {
        StreamingTransport {
            node,
            handle: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    async fn listen(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port)).await.map_err(Error::Io)?;
        let node = self.node.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(%peer, "streaming connection accepted");
                let node = node.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, node).await,
                        Err(e) => warn!(%peer, "websocket handshake failed: {e}"),
                    }
                });
            }
        });
        *self.handle.lock().await = Some(task);
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(task) = self.handle.lock().await.take() {
            task.abort();
        }
    }
}

/// Terminating error frame, same taxonomy as the HTTP surface
fn error_frame(code: &str, message: &str) -> Message {
    Message::Text(
        json!({
            "kind": "error",
            "error": code,
            "error_message": message,
        })
        .to_string(),
    )
}

async fn handle_connection(ws: WebSocketStream<TcpStream>, node: Arc<AgentNetwork>) {
    let (mut sink, mut source) = ws.split();

    // Register handshake first; anything else terminates the stream.
    let frame = match source.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            let _ = sink
                .send(error_frame("invalid_event", "expected a register frame"))
                .await;
            return;
        }
    };
    let register: RegisterFrame = match serde_json::from_str(&frame) {
        Ok(register) => register,
        Err(e) => {
            let _ = sink
                .send(error_frame("invalid_event", &format!("bad register frame: {e}")))
                .await;
            return;
        }
    };

    let agent_id = register.agent_id.clone();
    let mut req = RegistrationRequest::new(agent_id.clone(), TransportKind::Streaming)
        .with_metadata(register.metadata);
    req.password_hash = register.password_hash;
    req.force_reconnect = register.force_reconnect;

    let grant = match node.register_agent(req, register.subscriptions).await {
        Ok(grant) => grant,
        Err(e) => {
            let _ = sink.send(error_frame(e.code(), &e.to_string())).await;
            return;
        }
    };

    let hello = json!({
        "secret": grant.secret,
        "network_name": node.network_name(),
        "network_id": node.network_id(),
    });
    if sink.send(Message::Text(hello.to_string())).await.is_err() {
        node.gateway().drop_agent(&agent_id).await;
        return;
    }
    info!(%agent_id, "streaming agent connected");

    // Outbound push channel, bounded at the back-pressure watermark (the
    // gateway drops the agent when it fills), plus a small control channel
    // for error frames.
    let (tx, mut rx) = mpsc::channel::<Event>(node.limits().stream_watermark);
    let (ctl_tx, mut ctl_rx) = mpsc::channel::<Message>(8);
    node.gateway().attach_push(&agent_id, tx).await;

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                frame = ctl_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        // Writer gone: either the node dropped the agent or the socket
        // failed. Closing the sink ends the client's read loop.
        let _ = sink.close().await;
    });

    // Reader loop: every inbound text frame is one event, attributed to
    // this connection's agent no matter what the client claimed.
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let mut event: Event = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!(%agent_id, "undecodable frame: {e}");
                continue;
            }
        };
        event.source_id = format!("{AGENT_PREFIX}{agent_id}");
        if event.secret.is_none() {
            event.secret = Some(grant.secret.clone());
        }
        if let Err(e) = node.submit_external(event).await {
            warn!(%agent_id, "streaming submit rejected: {e}");
            let fatal = matches!(e, Error::AuthenticationFailed(_));
            let _ = ctl_tx.send(error_frame(e.code(), &e.to_string())).await;
            if fatal {
                break;
            }
        }
    }

    // Disconnect: free the push handle, the registration, the queue, and
    // the subscriptions.
    node.gateway().detach_push(&agent_id).await;
    node.gateway().drop_agent(&agent_id).await;
    writer.abort();
    info!(%agent_id, "streaming agent disconnected");
}
