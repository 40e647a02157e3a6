//! HTTP poll transport
//!
//! JSON endpoints in front of the gateway:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET  | `/api/health` | network stats |
//! | POST | `/api/register` | agent registration |
//! | POST | `/api/unregister` | agent unregistration |
//! | GET  | `/api/poll` | drain the agent's queue (long-poll) |
//! | POST | `/api/send_event` | submit one event |
//! | GET  | `/api/agents/service/{agent_id}/llm-logs` | LLM log listing |
//! | GET  | `/api/agents/service/{agent_id}/llm-logs/{log_id}` | full entry |

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::RegistrationRequest;
use crate::core::event::Event;
use crate::error::{Error, Result};
use crate::network::AgentNetwork;
use crate::workspace::LlmLogQuery;

use super::{Transport, TransportKind};

/// The HTTP transport listener
pub struct HttpTransport {
    node: Arc<AgentNetwork>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(node: Arc<AgentNetwork>) -> Self {
        HttpTransport {
            node,
            handle: Mutex::new(None),
        }
    }

    fn router(node: Arc<AgentNetwork>) -> Router {
        Router::new()
            .route("/api/health", get(health))
            .route("/api/register", post(register))
            .route("/api/unregister", post(unregister))
            .route("/api/poll", get(poll))
            .route("/api/send_event", post(send_event))
            .route("/api/agents/service/{agent_id}/llm-logs", get(llm_logs))
            .route(
                "/api/agents/service/{agent_id}/llm-logs/{log_id}",
                get(llm_log_detail),
            )
            .layer(tower_http::cors::CorsLayer::permissive())
            .with_state(node)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn listen(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port)).await.map_err(Error::Io)?;
        let app = Self::router(self.node.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("http transport serve error: {e}");
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

// ============================================================================
// Error mapping
// ============================================================================

/// Failure body: `{success: false, error_message: <wire code>}`
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "success": false,
            "error_message": self.0.code(),
        }));
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(node): State<Arc<AgentNetwork>>) -> Json<Value> {
    let stats = node.network_stats().await;
    Json(json!({"success": true, "data": stats}))
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    agent_id: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    transport_type: Option<TransportKind>,
    /// Accepted for wire compatibility; certificates play no role in
    /// registration.
    #[serde(default)]
    #[allow(dead_code)]
    certificate: Option<Value>,
    #[serde(default)]
    force_reconnect: bool,
    #[serde(default)]
    password_hash: Option<String>,
    /// Optional initial subscription patterns
    #[serde(default)]
    subscriptions: Vec<String>,
}

async fn register(
    State(node): State<Arc<AgentNetwork>>,
    Json(body): Json<RegisterBody>,
) -> std::result::Result<Json<Value>, ApiError> {
    let mut req = RegistrationRequest::new(
        body.agent_id.clone(),
        body.transport_type.unwrap_or(TransportKind::Http),
    )
    .with_metadata(body.metadata);
    req.password_hash = body.password_hash;
    req.force_reconnect = body.force_reconnect;

    let grant = node.register_agent(req, body.subscriptions).await?;
    debug!(agent_id = %body.agent_id, group = %grant.group, "http registration");
    Ok(Json(json!({
        "success": true,
        "secret": grant.secret,
        "group": grant.group,
        "network_name": node.network_name(),
        "network_id": node.network_id(),
    })))
}

#[derive(Debug, Deserialize)]
struct UnregisterBody {
    agent_id: String,
    secret: String,
}

async fn unregister(
    State(node): State<Arc<AgentNetwork>>,
    Json(body): Json<UnregisterBody>,
) -> std::result::Result<Json<Value>, ApiError> {
    node.unregister_agent(&body.agent_id, &body.secret).await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    agent_id: String,
    /// Seconds to wait for at least one event
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    max_items: Option<usize>,
}

async fn poll(
    State(node): State<Arc<AgentNetwork>>,
    Query(query): Query<PollQuery>,
) -> std::result::Result<Json<Value>, ApiError> {
    let wait = Duration::from_secs(query.timeout.unwrap_or(30));
    let messages = node
        .poll(&query.agent_id, query.max_items.unwrap_or(100), wait)
        .await?;
    Ok(Json(json!({
        "success": true,
        "messages": messages,
        "agent_id": query.agent_id,
    })))
}

async fn send_event(
    State(node): State<Arc<AgentNetwork>>,
    Json(event): Json<Event>,
) -> std::result::Result<Json<Value>, ApiError> {
    let deadline = node.limits().send_deadline;
    let outcome = tokio::time::timeout(deadline, node.submit_external(event))
        .await
        .map_err(|_| Error::Timeout("send_event deadline exceeded".to_string()))??;

    let body = match outcome.response {
        Some(response) => json!({
            "success": response.success,
            "event_id": outcome.event_id,
            "message": response.message,
            "response_data": response.data,
            "error_message": if response.success { Value::Null } else { json!(response.message) },
        }),
        None => json!({
            "success": true,
            "event_id": outcome.event_id,
        }),
    };
    Ok(Json(body))
}

async fn llm_logs(
    State(node): State<Arc<AgentNetwork>>,
    Path(agent_id): Path<String>,
    Query(query): Query<LlmLogQuery>,
) -> std::result::Result<Json<Value>, ApiError> {
    let page = node.workspace().llm_logs().query(&agent_id, &query).await?;
    Ok(Json(serde_json::to_value(page).map_err(Error::Json)?))
}

async fn llm_log_detail(
    State(node): State<Arc<AgentNetwork>>,
    Path((agent_id, log_id)): Path<(String, String)>,
) -> std::result::Result<Response, ApiError> {
    match node.workspace().llm_logs().get(&agent_id, &log_id).await? {
        Some(entry) => Ok(Json(serde_json::to_value(entry).map_err(Error::Json)?).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error_message": "not_found"})),
        )
            .into_response()),
    }
}
