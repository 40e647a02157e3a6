//! Event gateway - the in-process event bus
//!
//! Every event enters through [`EventGateway::submit`], in order: stamp,
//! authenticate, stamp the source group, classify, run the mod pipeline,
//! persist, route, deliver. Transports call `submit_external`, which
//! additionally refuses non-agent sources; `mod:` and `system:` sources
//! exist only in-process.
//!
//! ```text
//! transport ──▶ submit ──▶ auth ──▶ classify ──▶ mod chain ──▶ persist
//!                                                                 │
//!                            agent queues ◀── route/deliver ◀─────┘
//! ```

pub mod channels;
pub mod queue;
pub mod subscriptions;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::auth::{AgentRecord, AuthManager, RegistrationGrant, RegistrationRequest};
use crate::config::LimitsConfig;
use crate::core::event::{names, Destination, Event, EventClass, AGENT_PREFIX, SYSTEM_ID};
use crate::core::response::EventResponse;
use crate::error::{Error, Result};
use crate::mods::ModRegistry;
use crate::workspace::WorkspaceStore;

use channels::ChannelDirectory;
use queue::QueueTable;
use subscriptions::SubscriptionTable;

/// Successful submit result
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Server-stamped event id
    pub event_id: String,
    /// Structured response from a system event handler, when one answered
    pub response: Option<EventResponse>,
}

/// The event gateway
pub struct EventGateway {
    auth: Arc<AuthManager>,
    workspace: Arc<WorkspaceStore>,
    registry: Arc<ModRegistry>,
    channels: Arc<ChannelDirectory>,
    queues: QueueTable,
    subscriptions: SubscriptionTable,
    /// Push handles for streaming agents; events for these agents go over
    /// the connection instead of parking in a poll queue
    connections: RwLock<HashMap<String, mpsc::Sender<Event>>>,
    limits: LimitsConfig,
}

impl EventGateway {
    pub fn new(
        auth: Arc<AuthManager>,
        workspace: Arc<WorkspaceStore>,
        registry: Arc<ModRegistry>,
        channels: Arc<ChannelDirectory>,
        limits: LimitsConfig,
    ) -> Self {
        EventGateway {
            auth,
            workspace,
            registry,
            channels,
            queues: QueueTable::new(limits.poll_queue_cap),
            subscriptions: SubscriptionTable::new(),
            connections: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// The channel directory (shared with the mod context)
    pub fn channels(&self) -> &Arc<ChannelDirectory> {
        &self.channels
    }

    // ------------------------------------------------------------------
    // Agent lifecycle
    // ------------------------------------------------------------------

    /// Register an agent: assign group, issue secret, seed the queue,
    /// persist the registration, and notify mods.
    pub async fn register_agent(&self, req: RegistrationRequest) -> Result<RegistrationGrant> {
        let agent_id = req.agent_id.clone();
        let metadata = req.metadata.clone();
        let transport = req.transport;
        let grant = self.auth.register_agent(req).await?;

        if let Some(evicted) = &grant.evicted {
            debug!(agent_id = %evicted.agent_id, "cleaning up evicted registration");
            self.queues.remove(&evicted.agent_id).await;
            self.subscriptions.drop_agent(&evicted.agent_id).await;
            self.connections.write().await.remove(&evicted.agent_id);
        }

        self.queues.seed(&agent_id).await;

        let record = AgentRecord {
            agent_id: agent_id.clone(),
            transport,
            registered_at: chrono::Utc::now(),
            last_seen: chrono::Utc::now(),
            metadata: metadata.clone(),
            group: grant.group.clone(),
            connected: true,
            secret: None,
        };
        if let Err(e) = self.persist_registration(&record).await {
            // The agent must not believe it is registered when the durable
            // record failed.
            let _ = self.auth.remove(&agent_id).await;
            self.queues.remove(&agent_id).await;
            return Err(e);
        }

        self.registry.notify_register(&agent_id, &metadata).await;
        Ok(grant)
    }

    async fn persist_registration(&self, record: &AgentRecord) -> Result<()> {
        self.workspace.log_agent_registered(record).await?;
        let membership = self.auth.membership().await;
        self.workspace.write_groups_snapshot(&membership).await
    }

    /// Unregister an agent; requires its secret so another agent cannot
    /// spoof the disconnect.
    pub async fn unregister_agent(&self, agent_id: &str, secret: &str) -> Result<()> {
        self.auth.unregister(agent_id, secret).await?;
        self.teardown_agent(agent_id).await;
        Ok(())
    }

    /// Remove an agent after a transport-observed disconnect. Idempotent.
    pub async fn drop_agent(&self, agent_id: &str) {
        if self.auth.remove(agent_id).await.is_ok() {
            self.teardown_agent(agent_id).await;
        }
    }

    async fn teardown_agent(&self, agent_id: &str) {
        self.queues.remove(agent_id).await;
        self.subscriptions.drop_agent(agent_id).await;
        self.connections.write().await.remove(agent_id);
        if let Err(e) = self.workspace.log_agent_unregistered(agent_id).await {
            warn!(agent_id, "failed to persist unregistration: {e}");
        }
        let membership = self.auth.membership().await;
        if let Err(e) = self.workspace.write_groups_snapshot(&membership).await {
            warn!(agent_id, "failed to persist group snapshot: {e}");
        }
        self.registry.notify_unregister(agent_id).await;
        info!(agent_id, "agent removed");
    }

    /// Attach a streaming push handle for an agent
    pub async fn attach_push(&self, agent_id: &str, sender: mpsc::Sender<Event>) {
        self.connections
            .write()
            .await
            .insert(agent_id.to_string(), sender);
    }

    /// Detach a streaming push handle. Idempotent.
    pub async fn detach_push(&self, agent_id: &str) {
        self.connections.write().await.remove(agent_id);
    }

    // ------------------------------------------------------------------
    // Subscriptions & polling
    // ------------------------------------------------------------------

    /// Register a subscription for a registered agent; returns its id.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        patterns: Vec<String>,
        mod_filter: Option<String>,
    ) -> Result<String> {
        if !self.auth.is_registered(agent_id).await {
            return Err(Error::UnknownAgent(agent_id.to_string()));
        }
        Ok(self
            .subscriptions
            .subscribe(agent_id, patterns, mod_filter)
            .await)
    }

    /// Remove a subscription. Idempotent.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.unsubscribe(subscription_id).await;
    }

    /// Drain an agent's queue, waiting up to `wait` when empty. The wait
    /// is clamped to the configured maximum; client disconnect releases it
    /// because the handler future is dropped.
    pub async fn poll(
        &self,
        agent_id: &str,
        max_items: usize,
        wait: Duration,
    ) -> Result<Vec<Event>> {
        let wait = wait.min(self.limits.max_poll_wait);
        let events = self.queues.poll(agent_id, max_items, wait).await?;
        self.auth.touch(agent_id).await;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Submit
    // ------------------------------------------------------------------

    /// Single ingress point for transports. Refuses sources a wire client
    /// must never claim.
    pub async fn submit_external(&self, event: Event) -> Result<SubmitOutcome> {
        if !event.source_id.starts_with(AGENT_PREFIX) {
            return Err(Error::InvalidEvent(format!(
                "wire events must carry an agent source, got '{}'",
                event.source_id
            )));
        }
        self.submit(event).await
    }

    /// Single ingress point for in-process producers (mods, system code).
    pub async fn submit(&self, event: Event) -> Result<SubmitOutcome> {
        self.submit_inner(event, false).await
    }

    /// Ingress for events the node itself vouches for: the internal event
    /// pump replaying mod emissions. Secret verification is skipped (a mod
    /// may speak for an agent); group stamping still applies.
    pub(crate) async fn submit_trusted(&self, event: Event) -> Result<SubmitOutcome> {
        self.submit_inner(event, true).await
    }

    async fn submit_inner(&self, mut event: Event, trusted: bool) -> Result<SubmitOutcome> {
        event.validate()?;
        event.ensure_stamped();

        // Authenticate agent sources before anything else observes the
        // event.
        if let Some(agent_id) = event.source_agent().map(str::to_string) {
            if !trusted
                && !self
                    .auth
                    .validate(&event.source_id, event.secret.as_deref())
                    .await
            {
                debug!(source = %event.source_id, event = %event.event_name, "authentication failed");
                return Err(Error::AuthenticationFailed(event.source_id.clone()));
            }
            self.auth.touch(&agent_id).await;
            event.source_agent_group = self.auth.group_of(&agent_id).await;
        } else {
            // Group stamps come from the registration table only.
            event.source_agent_group = None;
        }

        let class = event.classify();
        let event_id = event.event_id.clone();
        debug!(event = %event.event_name, id = %event_id, ?class, "event accepted");

        // Outbound system notification: a concrete agent destination
        // bypasses the chain and goes straight to delivery.
        if class == EventClass::System {
            if let Some(Destination::Agent(target)) = event.destination() {
                self.persist_if_durable(&event, true).await?;
                self.deliver(HashSet::from([target]), &event).await;
                return Ok(SubmitOutcome {
                    event_id,
                    response: None,
                });
            }
        }

        // Mod pipeline; a consumed event ends here.
        let verdict = self.registry.dispatch(event, class).await?;
        let Some(event) = verdict.event else {
            return Ok(SubmitOutcome {
                event_id,
                response: verdict.response,
            });
        };

        match class {
            EventClass::Direct => self.route_direct(&event).await?,
            EventClass::Broadcast => self.route_broadcast(&event).await?,
            EventClass::System => self.route_system(&event).await?,
        }

        Ok(SubmitOutcome {
            event_id,
            response: verdict.response,
        })
    }

    async fn route_direct(&self, event: &Event) -> Result<()> {
        let Some(Destination::Agent(target)) = event.destination() else {
            return Err(Error::InvalidEvent(
                "direct message without an agent destination".to_string(),
            ));
        };
        if !self.auth.is_registered(&target).await {
            return Err(Error::UnknownAgent(target));
        }
        self.persist_if_durable(event, true).await?;

        // A direct message is private: exactly one recipient, no
        // subscriber fan-out.
        self.deliver(HashSet::from([target]), event).await;
        Ok(())
    }

    async fn route_broadcast(&self, event: &Event) -> Result<()> {
        self.persist_if_durable(event, true).await?;

        let source = event.source_agent().unwrap_or_default().to_string();
        let mut recipients: HashSet<String> = self
            .auth
            .agent_ids()
            .await
            .into_iter()
            .filter(|id| *id != source)
            .collect();
        recipients.extend(self.observer_subscribers(event).await);
        self.deliver(recipients, event).await;
        Ok(())
    }

    async fn route_system(&self, event: &Event) -> Result<()> {
        let Some(channel) = event.channel_target() else {
            // Processed for side effects only; nothing to deliver.
            return Ok(());
        };

        // First post into a fresh channel creates it and announces the
        // creation exactly once.
        let created = self.channels.ensure(&channel, &event.source_id).await;
        self.persist_if_durable(event, true).await?;

        let mut recipients = self.subscriptions.channel_subscribers(&channel).await;
        recipients.extend(self.observer_subscribers(event).await);
        self.deliver(recipients, event).await;

        if created {
            let mut announce = Event::new(names::CHANNEL_CREATED, SYSTEM_ID)
                .with_destination(format!("channel:{channel}"))
                .with_payload(json!({"channel": channel, "creator": event.source_id}));
            announce.ensure_stamped();
            self.persist_if_durable(&announce, true).await?;
            let mut observers = self.subscriptions.channel_subscribers(&channel).await;
            observers.extend(self.observer_subscribers(&announce).await);
            self.deliver(observers, &announce).await;
        }
        Ok(())
    }

    /// Subscribers whose patterns select the event, minus the source agent
    /// so nobody observes their own submissions twice.
    async fn observer_subscribers(&self, event: &Event) -> HashSet<String> {
        let mut matches = self.subscriptions.matching_agents(event).await;
        if let Some(source) = event.source_agent() {
            matches.remove(source);
        }
        matches
    }

    /// Persist a durable event before any recipient sees it, so a
    /// successful submit implies the event is on disk.
    async fn persist_if_durable(&self, event: &Event, durable: bool) -> Result<()> {
        if !durable || event.is_ephemeral() {
            return Ok(());
        }
        self.workspace.append_event(event).await
    }

    /// Fan an event out to a recipient set. Streaming agents are pushed
    /// over their connection; a backed-up or closed connection drops the
    /// agent (back-pressure policy). Poll agents are enqueued with
    /// drop-oldest. Per-recipient failures never abort the fan-out.
    async fn deliver(&self, recipients: HashSet<String>, event: &Event) {
        let delivery = event.for_delivery();
        let mut dead = Vec::new();
        {
            let connections = self.connections.read().await;
            for agent_id in &recipients {
                if let Some(push) = connections.get(agent_id) {
                    if push.try_send(delivery.clone()).is_err() {
                        warn!(agent_id, "streaming connection backed up, dropping");
                        dead.push(agent_id.clone());
                    }
                } else if !self.queues.enqueue(agent_id, delivery.clone()).await {
                    debug!(agent_id, "recipient gone before delivery");
                }
            }
        }
        for agent_id in dead {
            self.drop_agent(&agent_id).await;
        }
    }

    // ------------------------------------------------------------------
    // Introspection for the health surface
    // ------------------------------------------------------------------

    /// Live subscription count
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.count().await
    }

    /// Queue depth for one agent
    pub async fn queue_depth(&self, agent_id: &str) -> usize {
        self.queues.depth(agent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentGroupConfig;
    use crate::core::context::NetworkContext;
    use crate::core::event::Event;
    use crate::mods::{ModOutcome, NetworkMod};
    use crate::transport::TransportKind;
    use async_trait::async_trait;
    use serde_json::Map;
    use tempfile::TempDir;

    /// Echo mod: replies to every direct `agent.message` as if the
    /// destination answered.
    struct EchoMod;

    #[async_trait]
    impl NetworkMod for EchoMod {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process_direct_message(
            &self,
            event: Event,
            ctx: &NetworkContext,
        ) -> crate::error::Result<ModOutcome> {
            let already_echoed = event.metadata.contains_key("echoed");
            if event.event_name == names::AGENT_MESSAGE && !already_echoed {
                if let Some(Destination::Agent(target)) = event.destination() {
                    let text = event
                        .payload
                        .get("text")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default();
                    let reply = Event::new(names::AGENT_MESSAGE, format!("agent:{target}"))
                        .with_destination(event.source_id.clone())
                        .with_payload(json!({"text": format!("echo: {text}")}))
                        .with_metadata_entry("echoed", json!(true));
                    ctx.emit(reply)?;
                }
            }
            Ok(ModOutcome::Pass(event))
        }
    }

    struct Harness {
        gateway: Arc<EventGateway>,
        _pump: tokio::task::JoinHandle<()>,
        _dir: TempDir,
    }

    async fn harness(groups: Vec<(&str, AgentGroupConfig)>) -> Harness {
        let dir = TempDir::new().unwrap();
        let (workspace, _) = WorkspaceStore::open(dir.path(), "TestNet").unwrap();
        let workspace = Arc::new(workspace);
        let auth = Arc::new(AuthManager::new(
            groups
                .into_iter()
                .map(|(name, group)| (name.to_string(), group))
                .collect(),
            "guests",
            false,
        ));
        let channels = Arc::new(ChannelDirectory::new());
        let registry = Arc::new(ModRegistry::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = NetworkContext::new(
            "TestNet",
            "net-1",
            auth.clone(),
            workspace.clone(),
            channels.clone(),
            tx,
        );
        registry.set_context(ctx);
        let gateway = Arc::new(EventGateway::new(
            auth,
            workspace,
            registry,
            channels,
            LimitsConfig::default(),
        ));

        // Internal event pump, as the network runs it
        let pump_gateway = gateway.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = pump_gateway.submit_trusted(event).await;
            }
        });

        Harness {
            gateway,
            _pump: pump,
            _dir: dir,
        }
    }

    async fn register(gateway: &EventGateway, agent_id: &str) -> String {
        gateway
            .register_agent(RegistrationRequest::new(agent_id, TransportKind::Http))
            .await
            .unwrap()
            .secret
    }

    fn message(from: &str, to: &str, secret: &str, text: &str) -> Event {
        Event::new(names::AGENT_MESSAGE, format!("agent:{from}"))
            .with_destination(format!("agent:{to}"))
            .with_secret(secret)
            .with_payload(json!({"text": text}))
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        let _secret_b = register(&h.gateway, "b").await;

        h.gateway
            .submit_external(message("a", "b", &secret_a, "hi"))
            .await
            .unwrap();

        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["text"], "hi");
        // The stamped group arrives, the secret does not.
        assert_eq!(events[0].source_agent_group.as_deref(), Some("guests"));
        assert!(events[0].secret.is_none());
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected_before_mods_and_storage() {
        let h = harness(vec![]).await;
        let _secret_a = register(&h.gateway, "a").await;
        let _secret_b = register(&h.gateway, "b").await;

        let err = h
            .gateway
            .submit_external(message("a", "b", "BOGUS", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authentication_failed");

        // Nothing was delivered and nothing was persisted
        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(events.is_empty());
        let day = chrono::Utc::now().date_naive();
        let logged = h
            .gateway
            .workspace
            .read_events_for_day(day)
            .await
            .unwrap();
        assert!(logged.is_empty());
    }

    #[tokio::test]
    async fn test_direct_echo_scenario() {
        let h = harness(vec![]).await;
        h.gateway
            .registry
            .register_factory(
                "echo",
                Arc::new(|_| Ok(Arc::new(EchoMod) as Arc<dyn NetworkMod>)),
            );
        h.gateway
            .registry
            .load("echo", Map::new())
            .await
            .unwrap();

        let secret_a = register(&h.gateway, "a").await;
        let _secret_b = register(&h.gateway, "b").await;

        h.gateway
            .submit_external(message("a", "b", &secret_a, "hi"))
            .await
            .unwrap();

        // b receives the original
        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["text"], "hi");

        // a receives the reply emitted by the echo mod as b
        let events = h
            .gateway
            .poll("a", 10, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_id, "agent:b");
        assert!(events[0].payload["text"]
            .as_str()
            .unwrap()
            .contains("hi"));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_source() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        register(&h.gateway, "b").await;
        register(&h.gateway, "c").await;

        let event = Event::new("agent.broadcast_message.text", "agent:a")
            .with_secret(&secret_a)
            .with_payload(json!({"text": "all hands"}));
        h.gateway.submit_external(event).await.unwrap();

        for agent in ["b", "c"] {
            let events = h
                .gateway
                .poll(agent, 10, Duration::from_millis(50))
                .await
                .unwrap();
            assert_eq!(events.len(), 1, "agent {agent} should get one copy");
        }
        let events = h
            .gateway
            .poll("a", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(events.is_empty(), "source must not receive its own broadcast");
    }

    #[tokio::test]
    async fn test_direct_message_is_not_fanned_out_to_subscribers() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        register(&h.gateway, "b").await;
        register(&h.gateway, "snoop").await;

        h.gateway
            .subscribe("snoop", vec!["*".to_string()], None)
            .await
            .unwrap();

        h.gateway
            .submit_external(message("a", "b", &secret_a, "private"))
            .await
            .unwrap();

        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);

        // A wildcard subscription never widens a one-to-one message
        let events = h
            .gateway
            .poll("snoop", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_direct_to_unknown_agent_fails() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        let err = h
            .gateway
            .submit_external(message("a", "ghost", &secret_a, "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
    }

    #[tokio::test]
    async fn test_channel_post_fans_out_and_creates() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        register(&h.gateway, "b").await;
        register(&h.gateway, "c").await;

        h.gateway
            .subscribe("b", vec!["channel:general".to_string()], None)
            .await
            .unwrap();
        h.gateway
            .subscribe("c", vec!["thread.channel.*".to_string()], None)
            .await
            .unwrap();

        let post = Event::new(names::CHANNEL_POST, "agent:a")
            .with_secret(&secret_a)
            .with_payload(json!({"channel": "general", "text": "hello"}));
        h.gateway.submit_external(post).await.unwrap();

        // Channel subscriber gets the post and the creation notice
        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(50))
            .await
            .unwrap();
        let names_seen: Vec<&str> = events.iter().map(|e| e.event_name.as_str()).collect();
        assert!(names_seen.contains(&names::CHANNEL_POST));
        assert!(names_seen.contains(&names::CHANNEL_CREATED));

        // Pattern subscriber gets the post
        let events = h
            .gateway
            .poll("c", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_name == names::CHANNEL_POST));

        // Second post does not re-create
        let post = Event::new(names::CHANNEL_POST, "agent:a")
            .with_secret(&secret_a)
            .with_payload(json!({"channel": "general", "text": "again"}));
        h.gateway.submit_external(post).await.unwrap();
        let events = h
            .gateway
            .poll("b", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(events
            .iter()
            .all(|e| e.event_name != names::CHANNEL_CREATED));
    }

    #[tokio::test]
    async fn test_per_source_fifo() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        register(&h.gateway, "b").await;

        for i in 0..20 {
            h.gateway
                .submit_external(message("a", "b", &secret_a, &format!("m{i}")))
                .await
                .unwrap();
        }
        let events = h
            .gateway
            .poll("b", 100, Duration::from_millis(50))
            .await
            .unwrap();
        let texts: Vec<String> = events
            .iter()
            .map(|e| e.payload["text"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn test_system_event_with_agent_destination_bypasses_chain() {
        let h = harness(vec![]).await;
        register(&h.gateway, "a").await;

        // A consuming mod would stop anything that runs the chain
        struct BlackHole;
        #[async_trait]
        impl NetworkMod for BlackHole {
            fn name(&self) -> &str {
                "blackhole"
            }
            async fn process_system_message(
                &self,
                _event: Event,
                _ctx: &NetworkContext,
            ) -> crate::error::Result<ModOutcome> {
                Ok(ModOutcome::Consume)
            }
        }
        h.gateway.registry.register_factory(
            "blackhole",
            Arc::new(|_| Ok(Arc::new(BlackHole) as Arc<dyn NetworkMod>)),
        );
        h.gateway
            .registry
            .load("blackhole", Map::new())
            .await
            .unwrap();

        let notification = Event::new("project.complete.notification", SYSTEM_ID)
            .with_destination("agent:a")
            .with_payload(json!({"project": "p1"}));
        h.gateway.submit(notification).await.unwrap();

        let events = h
            .gateway
            .poll("a", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, "project.complete.notification");
    }

    #[tokio::test]
    async fn test_external_submit_rejects_non_agent_sources() {
        let h = harness(vec![]).await;
        let err = h
            .gateway
            .submit_external(Event::new("x.y", "mod:messaging"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_event");

        let err = h
            .gateway
            .submit_external(Event::new("x.y", SYSTEM_ID))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_event");
    }

    #[tokio::test]
    async fn test_unregister_tears_down() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        h.gateway
            .subscribe("a", vec!["*".to_string()], None)
            .await
            .unwrap();

        h.gateway.unregister_agent("a", &secret_a).await.unwrap();
        assert_eq!(h.gateway.subscription_count().await, 0);
        assert!(h
            .gateway
            .poll("a", 10, Duration::from_millis(10))
            .await
            .is_err());

        // Idempotent drop after unregister
        h.gateway.drop_agent("a").await;
    }

    #[tokio::test]
    async fn test_streaming_push_delivery_and_overflow() {
        let h = harness(vec![]).await;
        let secret_a = register(&h.gateway, "a").await;
        register(&h.gateway, "b").await;

        let (tx, mut rx) = mpsc::channel(2);
        h.gateway.attach_push("b", tx).await;

        h.gateway
            .submit_external(message("a", "b", &secret_a, "pushed"))
            .await
            .unwrap();
        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.payload["text"], "pushed");

        // Fill the connection beyond its watermark without draining
        for i in 0..3 {
            h.gateway
                .submit_external(message("a", "b", &secret_a, &format!("x{i}")))
                .await
                .unwrap();
        }
        // The overflowing connection got b dropped from the network
        assert!(!h.gateway.auth.is_registered("b").await);
    }
}
