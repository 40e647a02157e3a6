//! Agent network - the composition root
//!
//! Wires the workspace store, auth manager, mod registry, event gateway,
//! and transport manager into one long-lived node. Construction performs
//! workspace recovery; `start` binds the transports and the internal event
//! pump; `shutdown` tears everything down in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::auth::{AuthManager, RegistrationGrant, RegistrationRequest};
use crate::config::{validate_config, LimitsConfig, NetworkConfig};
use crate::core::context::NetworkContext;
use crate::core::event::{names, Event};
use crate::core::response::EventResponse;
use crate::error::Result;
use crate::gateway::channels::ChannelDirectory;
use crate::gateway::{EventGateway, SubmitOutcome};
use crate::mods::ModRegistry;
use crate::transport::TransportManager;
use crate::workspace::WorkspaceStore;

/// The network node
pub struct AgentNetwork {
    config: NetworkConfig,
    network_id: String,
    started_at: DateTime<Utc>,
    auth: Arc<AuthManager>,
    workspace: Arc<WorkspaceStore>,
    registry: Arc<ModRegistry>,
    gateway: Arc<EventGateway>,
    transports: TransportManager,
    pump_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl AgentNetwork {
    /// Build a node from configuration: open (or recover) the workspace,
    /// rebuild the agent and group tables, and load the mod pipeline.
    /// No listener is bound until [`start`](Self::start).
    pub async fn create(config: NetworkConfig) -> Result<Arc<Self>> {
        validate_config(&config)?;

        let workspace_root = config
            .workspace_path
            .clone()
            .unwrap_or_else(crate::config::default_workspace_dir);
        let (workspace, recovered) = WorkspaceStore::open(workspace_root, &config.name)?;
        let workspace = Arc::new(workspace);
        let network_id = recovered.network_id.clone();

        #[allow(unused_mut)]
        let mut auth = AuthManager::new(
            config.agent_groups.clone(),
            config.default_agent_group.clone(),
            config.requires_password,
        );
        #[cfg(feature = "insecure-auth")]
        if config.disable_agent_secret_verification {
            auth.disable_secret_verification();
        }
        let auth = Arc::new(auth);
        for record in recovered.agents {
            auth.restore(record).await;
        }

        let channels = Arc::new(ChannelDirectory::new());
        let registry = Arc::new(ModRegistry::new(config.limits.mod_timeout));
        let (emitter, pump_rx) = mpsc::unbounded_channel();
        let ctx = NetworkContext::new(
            config.name.clone(),
            network_id.clone(),
            auth.clone(),
            workspace.clone(),
            channels.clone(),
            emitter,
        );
        registry.set_context(ctx);

        let gateway = Arc::new(EventGateway::new(
            auth.clone(),
            workspace.clone(),
            registry.clone(),
            channels,
            config.limits.clone(),
        ));

        // The manifest's mod list wins over the config on a restart, so
        // dynamic load/unload decisions survive.
        let mods = if recovered.mods.is_empty() {
            config.mods.clone()
        } else {
            recovered.mods
        };
        for item in &mods {
            registry.load(&item.name, item.config.clone()).await?;
        }

        info!(
            network = %config.name,
            %network_id,
            mods = mods.len(),
            "network node created"
        );

        Ok(Arc::new(AgentNetwork {
            config,
            network_id,
            started_at: Utc::now(),
            auth,
            workspace,
            registry,
            gateway,
            transports: TransportManager::new(),
            pump_rx: Mutex::new(Some(pump_rx)),
            pump_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }))
    }

    /// Start the internal event pump and bind every configured transport.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut rx = self
            .pump_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| crate::error::Error::Internal("node already started".to_string()))?;

        // Replays mod/system emissions back into the gateway. These are
        // trusted: they can only originate in-process.
        let gateway = self.gateway.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = gateway.submit_trusted(event).await {
                    error!("internal event rejected: {e}");
                }
            }
        });
        *self.pump_task.lock().await = Some(pump);

        self.transports.start_all(&self.config, self.clone()).await?;
        self.running.store(true, Ordering::SeqCst);
        info!(network = %self.config.name, "network node running");
        Ok(())
    }

    /// Stop transports, the event pump, and every mod.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.transports.shutdown_all().await;
        if let Some(pump) = self.pump_task.lock().await.take() {
            pump.abort();
        }
        // Shutdown hooks only; the manifest keeps the pipeline for the
        // next boot.
        self.registry.shutdown_all().await;
        info!(network = %self.config.name, "network node stopped");
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn network_name(&self) -> &str {
        &self.config.name
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.config.limits
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Arc<WorkspaceStore> {
        &self.workspace
    }

    pub fn gateway(&self) -> &Arc<EventGateway> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<ModRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Operations delegated by transports
    // ------------------------------------------------------------------

    /// Register an agent and seed its optional initial subscriptions.
    pub async fn register_agent(
        &self,
        req: RegistrationRequest,
        subscriptions: Vec<String>,
    ) -> Result<RegistrationGrant> {
        let agent_id = req.agent_id.clone();
        let grant = self.gateway.register_agent(req).await?;
        if !subscriptions.is_empty() {
            self.gateway
                .subscribe(&agent_id, subscriptions, None)
                .await?;
        }
        Ok(grant)
    }

    /// Unregister an agent (secret-verified).
    pub async fn unregister_agent(&self, agent_id: &str, secret: &str) -> Result<()> {
        self.gateway.unregister_agent(agent_id, secret).await
    }

    /// Submit a wire event. Health probes are answered directly; anything
    /// else takes the full gateway path.
    pub async fn submit_external(&self, mut event: Event) -> Result<SubmitOutcome> {
        if event.event_name == names::SYSTEM_HEALTH_CHECK {
            event.ensure_stamped();
            return Ok(SubmitOutcome {
                event_id: event.event_id,
                response: Some(EventResponse::ok_with_data(self.network_stats().await)),
            });
        }
        self.gateway.submit_external(event).await
    }

    /// Submit an in-process event.
    pub async fn submit(&self, mut event: Event) -> Result<SubmitOutcome> {
        if event.event_name == names::SYSTEM_HEALTH_CHECK {
            event.ensure_stamped();
            return Ok(SubmitOutcome {
                event_id: event.event_id,
                response: Some(EventResponse::ok_with_data(self.network_stats().await)),
            });
        }
        self.gateway.submit(event).await
    }

    /// Drain an agent's queue.
    pub async fn poll(
        &self,
        agent_id: &str,
        max_items: usize,
        wait: Duration,
    ) -> Result<Vec<Event>> {
        self.gateway.poll(agent_id, max_items, wait).await
    }

    // ------------------------------------------------------------------
    // Health surface
    // ------------------------------------------------------------------

    /// The stats document served by `/api/health` and the
    /// `system.health.check` event.
    pub async fn network_stats(&self) -> Value {
        let records = self.auth.records_snapshot().await;
        let mut agents = Map::new();
        for record in &records {
            let queue_depth = self.gateway.queue_depth(&record.agent_id).await;
            agents.insert(
                record.agent_id.clone(),
                json!({
                    "group": record.group,
                    "transport": record.transport.as_str(),
                    "registered_at": record.registered_at,
                    "last_seen": record.last_seen,
                    "connected": record.connected,
                    "metadata": record.metadata,
                    "queue_depth": queue_depth,
                }),
            );
        }

        let group_config: Vec<Value> = self
            .auth
            .groups()
            .iter()
            .map(|(name, group)| {
                // Hashes never leave the node.
                json!({
                    "name": name,
                    "description": group.description,
                    "metadata": group.metadata,
                })
            })
            .collect();

        let loaded = self.registry.list_loaded().await;
        let mod_names: Vec<&str> = loaded.iter().map(|m| m.name.as_str()).collect();

        json!({
            "network_id": self.network_id,
            "network_name": self.config.name,
            "is_running": self.is_running(),
            "uptime_seconds": (Utc::now() - self.started_at).num_seconds(),
            "agent_count": records.len(),
            "agents": agents,
            "groups": self.auth.membership().await,
            "group_config": group_config,
            "mods": mod_names,
            "dynamic_mods": {
                "loaded": mod_names,
                "count": loaded.len(),
                "details": loaded,
            },
            "transports": self.transports.kinds().await,
            "readme": self.config.readme(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::config::{AgentGroupConfig, ModConfigItem};
    use crate::transport::TransportKind;
    use tempfile::TempDir;

    async fn node_with_workspace(dir: &TempDir) -> Arc<AgentNetwork> {
        let mut config = NetworkConfig::minimal("TestNet", 18570);
        config.workspace_path = Some(dir.path().to_path_buf());
        config.default_agent_group = "guests".to_string();
        config.mods = vec![ModConfigItem {
            name: "messaging".to_string(),
            config: Map::new(),
        }];
        AgentNetwork::create(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_restart_recovers_agents_groups_and_mods() {
        let dir = TempDir::new().unwrap();
        {
            let node = node_with_workspace(&dir).await;
            node.register_agent(
                RegistrationRequest::new("a", TransportKind::Http),
                Vec::new(),
            )
            .await
            .unwrap();
            node.register_agent(
                RegistrationRequest::new("b", TransportKind::Http),
                Vec::new(),
            )
            .await
            .unwrap();
            node.shutdown().await;
        }

        let node = node_with_workspace(&dir).await;
        let stats = node.network_stats().await;
        assert_eq!(stats["agent_count"], 2);
        assert!(stats["agents"].get("a").is_some());
        assert_eq!(stats["groups"]["guests"], json!(["a", "b"]));
        // Recovered agents are disconnected until they re-register
        assert_eq!(stats["agents"]["a"]["connected"], json!(false));
        // Pipeline restored from the manifest
        assert_eq!(stats["mods"], json!(["messaging"]));
        // Same identity across restarts
        assert_eq!(stats["network_id"].as_str().unwrap(), node.network_id());
    }

    #[tokio::test]
    async fn test_group_assignment_scenario() {
        let dir = TempDir::new().unwrap();
        let mut config = NetworkConfig::minimal("TestNet", 18571);
        config.workspace_path = Some(dir.path().to_path_buf());
        config.requires_password = true;
        let mut metadata = Map::new();
        metadata.insert("permissions".to_string(), json!(["all"]));
        config.agent_groups.insert(
            "admins".to_string(),
            AgentGroupConfig {
                password_hash: hash_password("s3cret"),
                description: None,
                metadata,
            },
        );
        let node = AgentNetwork::create(config).await.unwrap();

        // No hash while the network requires one
        let err = node
            .register_agent(
                RegistrationRequest::new("anon", TransportKind::Http),
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authentication_required");

        // Matching hash lands in the right group
        let grant = node
            .register_agent(
                RegistrationRequest::new("root", TransportKind::Http)
                    .with_password_hash(hash_password("s3cret")),
                Vec::new(),
            )
            .await
            .unwrap();
        assert_eq!(grant.group, "admins");
    }

    #[tokio::test]
    async fn test_health_check_event_answers_with_stats() {
        let dir = TempDir::new().unwrap();
        let node = node_with_workspace(&dir).await;
        let outcome = node
            .submit(Event::new(
                names::SYSTEM_HEALTH_CHECK,
                crate::core::event::SYSTEM_ID,
            ))
            .await
            .unwrap();
        let response = outcome.response.unwrap();
        assert!(response.success);
        assert_eq!(response.data.unwrap()["network_name"], "TestNet");
    }

    #[tokio::test]
    async fn test_dynamic_mod_hot_swap() {
        let dir = TempDir::new().unwrap();
        let mut config = NetworkConfig::minimal("TestNet", 18572);
        config.workspace_path = Some(dir.path().to_path_buf());
        let node = AgentNetwork::create(config).await.unwrap();

        // Load via the reserved system event
        let outcome = node
            .submit(
                Event::new(names::SYSTEM_MOD_LOAD, crate::core::event::SYSTEM_ID)
                    .with_payload(json!({"mod_path": "messaging"})),
            )
            .await
            .unwrap();
        assert!(outcome.response.unwrap().success);
        assert!(node.registry().is_loaded("messaging").await);

        // Events pinned to the mod now dispatch to it
        let outcome = node
            .submit(
                Event::new(names::ANNOUNCEMENT_GET, crate::core::event::SYSTEM_ID)
                    .with_payload(json!({"channel": "general"}))
                    .with_relevant_mod("messaging"),
            )
            .await
            .unwrap();
        assert!(outcome.response.unwrap().success);

        // Unload and the same pinned event is unknown_mod
        let outcome = node
            .submit(
                Event::new(names::SYSTEM_MOD_UNLOAD, crate::core::event::SYSTEM_ID)
                    .with_payload(json!({"mod_path": "messaging"})),
            )
            .await
            .unwrap();
        assert!(outcome.response.unwrap().success);

        let err = node
            .submit(
                Event::new(names::ANNOUNCEMENT_GET, crate::core::event::SYSTEM_ID)
                    .with_payload(json!({"channel": "general"}))
                    .with_relevant_mod("messaging"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_mod");
    }
}
