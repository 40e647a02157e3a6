//! Mod registry and pipeline
//!
//! Mods are pluggable in-process processors that observe and may transform
//! events between ingress and delivery. The registry owns the ordered mod
//! list, resolves dotted paths through a factory table, and runs each
//! event through the chain.
//!
//! Pipeline discipline: a mod may be invoked concurrently on multiple
//! events and must handle its own state serialization; the registry takes
//! a snapshot of the list at the start of each event, so dynamic
//! load/unload never interrupts in-flight processing.

pub mod messaging;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ModConfigItem;
use crate::core::context::NetworkContext;
use crate::core::event::{names, Event, EventClass};
use crate::core::response::EventResponse;
use crate::error::{Error, Result};

// ============================================================================
// Mod trait
// ============================================================================

/// What a processor did with an event
#[derive(Debug)]
pub enum ModOutcome {
    /// Continue down the chain with this (possibly mutated) event
    Pass(Event),
    /// Stop the chain; no further mods, no delivery
    Consume,
    /// Stop the chain and answer the submitter
    Respond(EventResponse),
}

/// A network-level mod.
///
/// All hooks have pass-through defaults; a mod implements only the
/// processors it cares about.
#[async_trait]
pub trait NetworkMod: Send + Sync {
    /// Canonical mod name
    fn name(&self) -> &str;

    /// Called once when the mod is attached to the pipeline
    async fn initialize(&self, _ctx: &NetworkContext) -> Result<()> {
        Ok(())
    }

    /// Called once when the mod is removed from the pipeline
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Observe an agent joining the network
    async fn handle_register_agent(&self, _agent_id: &str, _metadata: &Map<String, Value>) {}

    /// Observe an agent leaving the network
    async fn handle_unregister_agent(&self, _agent_id: &str) {}

    /// Process a direct message
    async fn process_direct_message(
        &self,
        event: Event,
        _ctx: &NetworkContext,
    ) -> Result<ModOutcome> {
        Ok(ModOutcome::Pass(event))
    }

    /// Process a broadcast message
    async fn process_broadcast_message(
        &self,
        event: Event,
        _ctx: &NetworkContext,
    ) -> Result<ModOutcome> {
        Ok(ModOutcome::Pass(event))
    }

    /// Process a system message
    async fn process_system_message(
        &self,
        event: Event,
        _ctx: &NetworkContext,
    ) -> Result<ModOutcome> {
        Ok(ModOutcome::Pass(event))
    }
}

/// Builds a mod instance from its configuration
pub type ModFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn NetworkMod>> + Send + Sync>;

// ============================================================================
// Registry
// ============================================================================

/// A loaded mod
struct ModEntry {
    /// Canonical name
    name: String,
    /// Path as requested at load time (may be an alias)
    path: String,
    config: Map<String, Value>,
    loaded_at: DateTime<Utc>,
    instance: Arc<dyn NetworkMod>,
}

/// Listing row for the health surface
#[derive(Debug, Clone, Serialize)]
pub struct ModInfo {
    pub name: String,
    pub path: String,
    pub loaded_at: DateTime<Utc>,
}

/// Result of running the chain over one event
#[derive(Debug)]
pub struct PipelineVerdict {
    /// The post-chain event, or None when a mod consumed it
    pub event: Option<Event>,
    /// Response produced by a mod or by a registry-handled system command
    pub response: Option<EventResponse>,
}

/// Ordered mod registry
pub struct ModRegistry {
    factories: StdRwLock<HashMap<String, ModFactory>>,
    aliases: StdRwLock<HashMap<String, String>>,
    entries: RwLock<Vec<ModEntry>>,
    ctx: OnceLock<NetworkContext>,
    mod_timeout: Duration,
}

impl ModRegistry {
    pub fn new(mod_timeout: Duration) -> Self {
        let registry = ModRegistry {
            factories: StdRwLock::new(HashMap::new()),
            aliases: StdRwLock::new(HashMap::new()),
            entries: RwLock::new(Vec::new()),
            ctx: OnceLock::new(),
            mod_timeout,
        };
        registry.register_builtin_factories();
        registry
    }

    fn register_builtin_factories(&self) {
        self.register_factory(
            "messaging",
            Arc::new(|config| {
                Ok(Arc::new(messaging::MessagingMod::new(config.clone()))
                    as Arc<dyn NetworkMod>)
            }),
        );
        self.register_alias("openagents.mods.workspace.messaging", "messaging");
    }

    /// Register a mod factory under a canonical name. Embedding processes
    /// use this to make their own mods loadable by path.
    pub fn register_factory(&self, name: &str, factory: ModFactory) {
        self.factories
            .write()
            .expect("factory table poisoned")
            .insert(name.to_string(), factory);
    }

    /// Register an alternate dotted path for a canonical name
    pub fn register_alias(&self, alias: &str, canonical: &str) {
        self.aliases
            .write()
            .expect("alias table poisoned")
            .insert(alias.to_string(), canonical.to_string());
    }

    /// Attach the context mods initialize against. Called once during
    /// network construction, before any load.
    pub fn set_context(&self, ctx: NetworkContext) {
        let _ = self.ctx.set(ctx);
    }

    fn context(&self) -> Result<&NetworkContext> {
        self.ctx
            .get()
            .ok_or_else(|| Error::Internal("mod registry has no context".to_string()))
    }

    fn resolve(&self, path: &str) -> String {
        self.aliases
            .read()
            .expect("alias table poisoned")
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }

    /// Load a mod by dotted path and append it to the pipeline.
    ///
    /// Fails with `unknown_mod` when the path does not resolve to a
    /// factory, `mod_load_failed` when initialization errors, and
    /// `duplicate` semantics fold into `mod_load_failed` for an
    /// already-loaded name. Emits `system.mod.loaded` and persists the new
    /// pipeline order.
    pub async fn load(&self, mod_path: &str, config: Map<String, Value>) -> Result<()> {
        let canonical = self.resolve(mod_path);
        let factory = {
            let factories = self.factories.read().expect("factory table poisoned");
            factories
                .get(&canonical)
                .cloned()
                .ok_or_else(|| Error::UnknownMod(mod_path.to_string()))?
        };

        let ctx = self.context()?;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.name == canonical) {
            return Err(Error::ModLoadFailed(format!(
                "mod '{canonical}' is already loaded"
            )));
        }

        let instance = factory(&config)?;
        instance
            .initialize(ctx)
            .await
            .map_err(|e| Error::ModLoadFailed(format!("{canonical}: {e}")))?;
        // Mod storage subtree exists before the first processor call.
        ctx.mod_storage_path(&canonical)?;

        entries.push(ModEntry {
            name: canonical.clone(),
            path: mod_path.to_string(),
            config,
            loaded_at: Utc::now(),
            instance,
        });
        let configs = entries
            .iter()
            .map(|e| ModConfigItem {
                name: e.path.clone(),
                config: e.config.clone(),
            })
            .collect();
        drop(entries);

        ctx.workspace().set_mods(configs).await?;
        info!(mod_path, %canonical, "mod loaded");
        let _ = ctx.emit(
            Event::new(names::SYSTEM_MOD_LOADED, crate::core::event::SYSTEM_ID)
                .with_payload(serde_json::json!({"mod_path": canonical})),
        );
        Ok(())
    }

    /// Remove a mod from the pipeline. In-flight events keep their
    /// snapshot and finish against the old chain.
    pub async fn unload(&self, mod_path: &str) -> Result<()> {
        let canonical = self.resolve(mod_path);
        let ctx = self.context()?;

        let mut entries = self.entries.write().await;
        let idx = entries
            .iter()
            .position(|e| e.name == canonical)
            .ok_or_else(|| Error::UnknownMod(mod_path.to_string()))?;
        let entry = entries.remove(idx);
        let configs = entries
            .iter()
            .map(|e| ModConfigItem {
                name: e.path.clone(),
                config: e.config.clone(),
            })
            .collect();
        drop(entries);

        if let Err(e) = entry.instance.shutdown().await {
            warn!(%canonical, "mod shutdown error: {e}");
        }
        ctx.workspace().set_mods(configs).await?;
        info!(%canonical, "mod unloaded");
        let _ = ctx.emit(
            Event::new(names::SYSTEM_MOD_UNLOADED, crate::core::event::SYSTEM_ID)
                .with_payload(serde_json::json!({"mod_path": canonical})),
        );
        Ok(())
    }

    /// Shut every mod down without touching the persisted pipeline. Used
    /// at node shutdown so the manifest keeps the pipeline for the next
    /// boot.
    pub async fn shutdown_all(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.drain(..) {
            if let Err(e) = entry.instance.shutdown().await {
                warn!(mod_name = %entry.name, "mod shutdown error: {e}");
            }
        }
    }

    /// Names, paths, and load times of the loaded mods, in pipeline order
    pub async fn list_loaded(&self) -> Vec<ModInfo> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| ModInfo {
                name: e.name.clone(),
                path: e.path.clone(),
                loaded_at: e.loaded_at,
            })
            .collect()
    }

    /// Whether the named mod is loaded
    pub async fn is_loaded(&self, mod_path: &str) -> bool {
        let canonical = self.resolve(mod_path);
        self.entries.read().await.iter().any(|e| e.name == canonical)
    }

    /// Notify every mod of an agent registration
    pub async fn notify_register(&self, agent_id: &str, metadata: &Map<String, Value>) {
        let snapshot = self.snapshot().await;
        for (_, instance) in snapshot {
            instance.handle_register_agent(agent_id, metadata).await;
        }
    }

    /// Notify every mod of an agent unregistration
    pub async fn notify_unregister(&self, agent_id: &str) {
        let snapshot = self.snapshot().await;
        for (_, instance) in snapshot {
            instance.handle_unregister_agent(agent_id).await;
        }
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn NetworkMod>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| (e.name.clone(), e.instance.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    /// Run an event through the chain.
    ///
    /// With `relevant_mod` set, only that mod's matching processor runs;
    /// an unloaded relevant mod is `unknown_mod`. Otherwise the ordered
    /// snapshot runs until a mod consumes or responds. Errors and
    /// timeouts are logged and treated as pass-through.
    ///
    /// The two registry-scoped system commands (`system.mod.load`,
    /// `system.mod.unload`) are handled here after the chain, gated on
    /// operator permission.
    pub async fn dispatch(&self, event: Event, class: EventClass) -> Result<PipelineVerdict> {
        let ctx = self.context()?;

        let mut verdict = if let Some(pinned) = event.relevant_mod.clone() {
            let canonical = self.resolve(&pinned);
            let snapshot = self.snapshot().await;
            let Some((name, instance)) =
                snapshot.into_iter().find(|(name, _)| *name == canonical)
            else {
                return Err(Error::UnknownMod(pinned));
            };
            self.run_one(&name, &instance, event, class, ctx).await
        } else {
            let snapshot = self.snapshot().await;
            let mut current = event;
            let mut result = PipelineVerdict {
                event: None,
                response: None,
            };
            let mut consumed = false;
            for (name, instance) in snapshot {
                match self.run_one(&name, &instance, current.clone(), class, ctx).await {
                    PipelineVerdict {
                        event: Some(next), ..
                    } => current = next,
                    stopped => {
                        result.response = stopped.response;
                        consumed = true;
                        break;
                    }
                }
            }
            if !consumed {
                result.event = Some(current);
            }
            result
        };

        // Registry-scoped system commands run after the chain so mods can
        // observe (or veto) them.
        if let Some(event) = verdict.event.take() {
            if class == EventClass::System
                && matches!(
                    event.event_name.as_str(),
                    names::SYSTEM_MOD_LOAD | names::SYSTEM_MOD_UNLOAD
                )
            {
                verdict.response = Some(self.handle_mod_command(&event, ctx).await);
            } else {
                verdict.event = Some(event);
            }
        }
        Ok(verdict)
    }

    async fn run_one(
        &self,
        name: &str,
        instance: &Arc<dyn NetworkMod>,
        event: Event,
        class: EventClass,
        ctx: &NetworkContext,
    ) -> PipelineVerdict {
        // Keep a copy so a failing mod passes the event through unchanged.
        let fallback = event.clone();
        let processor = async {
            match class {
                EventClass::Direct => instance.process_direct_message(event, ctx).await,
                EventClass::Broadcast => instance.process_broadcast_message(event, ctx).await,
                EventClass::System => instance.process_system_message(event, ctx).await,
            }
        };
        match tokio::time::timeout(self.mod_timeout, processor).await {
            Ok(Ok(ModOutcome::Pass(next))) => PipelineVerdict {
                event: Some(next),
                response: None,
            },
            Ok(Ok(ModOutcome::Consume)) => {
                debug!(mod_name = name, event_id = %fallback.event_id, "event consumed by mod");
                PipelineVerdict {
                    event: None,
                    response: None,
                }
            }
            Ok(Ok(ModOutcome::Respond(response))) => PipelineVerdict {
                event: None,
                response: Some(response),
            },
            Ok(Err(e)) => {
                error!(mod_name = name, event_id = %fallback.event_id, "mod processor error: {e}");
                PipelineVerdict {
                    event: Some(fallback),
                    response: None,
                }
            }
            Err(_) => {
                error!(
                    mod_name = name,
                    event_id = %fallback.event_id,
                    timeout = ?self.mod_timeout,
                    "mod processor timed out"
                );
                PipelineVerdict {
                    event: Some(fallback),
                    response: None,
                }
            }
        }
    }

    async fn handle_mod_command(&self, event: &Event, ctx: &NetworkContext) -> EventResponse {
        if !ctx.source_has_permission(event, "all") {
            return EventResponse::error("forbidden");
        }
        let Some(mod_path) = event.payload.get("mod_path").and_then(Value::as_str) else {
            return EventResponse::error("invalid_event");
        };
        let result = match event.event_name.as_str() {
            names::SYSTEM_MOD_LOAD => {
                let config = event
                    .payload
                    .get("config")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                self.load(mod_path, config).await
            }
            _ => self.unload(mod_path).await,
        };
        match result {
            Ok(()) => EventResponse::ok_with_data(serde_json::json!({"mod_path": mod_path})),
            Err(e) => EventResponse::error(e.code()),
        }
    }
}
