//! Event envelope - the sole inter-component message type
//!
//! Every inter-agent and inter-module interaction in the node travels as an
//! [`Event`]. Transports decode wire frames into events, the gateway stamps
//! and authenticates them, the mod pipeline may transform them, and routing
//! delivers them to agent queues and channel subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Address prefixes
// ============================================================================

/// Prefix for agent-sourced or agent-addressed ids
pub const AGENT_PREFIX: &str = "agent:";
/// Prefix for mod-sourced or mod-addressed ids
pub const MOD_PREFIX: &str = "mod:";
/// Prefix for channel destinations
pub const CHANNEL_PREFIX: &str = "channel:";
/// The in-process system source/destination
pub const SYSTEM_ID: &str = "system:system";
/// Destination that fans out to every registered agent
pub const BROADCAST_DESTINATION: &str = "agent:broadcast";

// ============================================================================
// Reserved event names
// ============================================================================

/// Core-reserved event names; other dotted prefixes are mod-private.
pub mod names {
    /// Load a mod into the pipeline
    pub const SYSTEM_MOD_LOAD: &str = "system.mod.load";
    /// Unload a mod from the pipeline
    pub const SYSTEM_MOD_UNLOAD: &str = "system.mod.unload";
    /// Emitted after a successful load
    pub const SYSTEM_MOD_LOADED: &str = "system.mod.loaded";
    /// Emitted after a successful unload
    pub const SYSTEM_MOD_UNLOADED: &str = "system.mod.unloaded";
    /// Health/stats probe
    pub const SYSTEM_HEALTH_CHECK: &str = "system.health.check";
    /// Agent registration (transport-internal)
    pub const SYSTEM_REGISTER_AGENT: &str = "system.register_agent";
    /// Agent unregistration (transport-internal)
    pub const SYSTEM_UNREGISTER_AGENT: &str = "system.unregister_agent";

    /// Legacy agent-to-agent message name
    pub const AGENT_MESSAGE: &str = "agent.message";
    /// Prefix for direct messages
    pub const AGENT_DIRECT_PREFIX: &str = "agent.direct_message.";
    /// Prefix for broadcast messages
    pub const AGENT_BROADCAST_PREFIX: &str = "agent.broadcast_message.";

    /// Post into a channel
    pub const CHANNEL_POST: &str = "thread.channel.post";
    /// Reply within a channel thread
    pub const CHANNEL_REPLY: &str = "thread.channel.reply";
    /// React to a channel message
    pub const CHANNEL_REACTION: &str = "thread.channel.reaction";
    /// Direct-message notification from the messaging mod
    pub const DIRECT_NOTIFICATION: &str = "thread.direct_message.notification";
    /// Set a channel announcement (admin only)
    pub const ANNOUNCEMENT_SET: &str = "thread.announcement.set";
    /// Read a channel announcement
    pub const ANNOUNCEMENT_GET: &str = "thread.announcement.get";
    /// Emitted once when a channel first comes into existence
    pub const CHANNEL_CREATED: &str = "channel.created";
}

// ============================================================================
// Visibility & classification
// ============================================================================

/// Who may observe an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the destination agent
    Direct,
    /// Subscribers of the target channel
    Channel,
    /// Only the relevant mod
    #[serde(rename = "mod-only")]
    ModOnly,
    /// The whole network
    Network,
}

/// Derived event class; determines which mod processor runs and how the
/// event is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Agent-to-agent message with a single destination
    Direct,
    /// Fan-out to every registered agent except the source
    Broadcast,
    /// Everything else; processed for side effects
    System,
}

/// A parsed `destination_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single agent
    Agent(String),
    /// Every registered agent except the source
    Broadcast,
    /// A single mod
    Mod(String),
    /// A fan-out topic
    Channel(String),
    /// The node itself
    System,
}

// ============================================================================
// Event
// ============================================================================

/// The universal envelope the node routes.
///
/// Wire format is snake_case JSON. `event_id`, `timestamp`, and
/// `source_agent_group` are server-stamped on ingress; any value a client
/// supplies for `source_agent_group` is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, stamped on ingress when absent
    #[serde(default)]
    pub event_id: String,
    /// Dotted event name (e.g. `agent.message`, `thread.channel.post`)
    pub event_name: String,
    /// Logical producer: `agent:<id>`, `mod:<name>`, or `system:system`
    pub source_id: String,
    /// Optional destination address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    /// Arbitrary structured payload
    #[serde(default)]
    pub payload: Value,
    /// Open map for routing hints (thread name, context id)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Visibility; auto-derived from destination when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Per-agent credential, required for agent-sourced events.
    /// Never persisted and never forwarded to recipients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Stamped by the gateway from the group table; never trusted from
    /// the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent_group: Option<String>,
    /// Monotonic server stamp assigned on ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Pins the event to a single mod, bypassing full-chain dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_mod: Option<String>,
}

impl Event {
    /// Create a new event with the given name and source
    pub fn new(event_name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Event {
            event_id: String::new(),
            event_name: event_name.into(),
            source_id: source_id.into(),
            destination_id: None,
            payload: Value::Object(Map::new()),
            metadata: Map::new(),
            visibility: None,
            secret: None,
            source_agent_group: None,
            timestamp: None,
            relevant_mod: None,
        }
    }

    /// Set the destination address
    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = Some(destination_id.into());
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach the producing agent's secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Pin the event to a single mod
    pub fn with_relevant_mod(mut self, mod_name: impl Into<String>) -> Self {
        self.relevant_mod = Some(mod_name.into());
        self
    }

    /// Insert a metadata entry
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stamp `event_id` and `timestamp` if absent. Idempotent.
    pub fn ensure_stamped(&mut self) {
        if self.event_id.is_empty() {
            self.event_id = Uuid::new_v4().to_string();
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
    }

    /// The agent id when the source is an agent
    pub fn source_agent(&self) -> Option<&str> {
        self.source_id.strip_prefix(AGENT_PREFIX)
    }

    /// Whether the source is the in-process system
    pub fn is_system_source(&self) -> bool {
        self.source_id.starts_with("system:")
    }

    /// Whether the source is a mod
    pub fn is_mod_source(&self) -> bool {
        self.source_id.starts_with(MOD_PREFIX)
    }

    /// Parse the destination address, if any
    pub fn destination(&self) -> Option<Destination> {
        let dest = self.destination_id.as_deref()?;
        if dest == BROADCAST_DESTINATION {
            Some(Destination::Broadcast)
        } else if dest == SYSTEM_ID {
            Some(Destination::System)
        } else if let Some(agent) = dest.strip_prefix(AGENT_PREFIX) {
            Some(Destination::Agent(agent.to_string()))
        } else if let Some(name) = dest.strip_prefix(MOD_PREFIX) {
            Some(Destination::Mod(name.to_string()))
        } else if let Some(name) = dest.strip_prefix(CHANNEL_PREFIX) {
            Some(Destination::Channel(name.to_string()))
        } else {
            None
        }
    }

    /// The target channel: a `channel:<name>` destination, or the payload's
    /// `channel` field for `thread.channel.*` events.
    pub fn channel_target(&self) -> Option<String> {
        if let Some(Destination::Channel(name)) = self.destination() {
            return Some(name);
        }
        if self.event_name.starts_with("thread.channel.") {
            if let Some(name) = self.payload.get("channel").and_then(Value::as_str) {
                return Some(name.to_string());
            }
        }
        None
    }

    /// Classify by event name and destination.
    ///
    /// Broadcast takes precedence: an `agent.*` message addressed to
    /// `agent:broadcast` is a broadcast regardless of its name.
    pub fn classify(&self) -> EventClass {
        let dest = self.destination();
        if self.event_name.starts_with(names::AGENT_BROADCAST_PREFIX)
            || dest == Some(Destination::Broadcast)
        {
            return EventClass::Broadcast;
        }
        let is_direct_name = self.event_name.starts_with(names::AGENT_DIRECT_PREFIX)
            || self.event_name == names::AGENT_MESSAGE;
        if is_direct_name {
            if let Some(Destination::Agent(_)) = dest {
                return EventClass::Direct;
            }
        }
        EventClass::System
    }

    /// Effective visibility: the explicit value, or one derived from the
    /// destination.
    pub fn effective_visibility(&self) -> Visibility {
        if let Some(v) = self.visibility {
            return v;
        }
        match self.destination() {
            Some(Destination::Agent(_)) => Visibility::Direct,
            Some(Destination::Channel(_)) => Visibility::Channel,
            Some(Destination::Mod(_)) => Visibility::ModOnly,
            _ => Visibility::Network,
        }
    }

    /// Whether persistence may be skipped for this event. Health ticks and
    /// events explicitly flagged `ephemeral` are best-effort.
    pub fn is_ephemeral(&self) -> bool {
        if self.event_name == names::SYSTEM_HEALTH_CHECK {
            return true;
        }
        self.metadata
            .get("ephemeral")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Structural validation applied on ingress, before authentication.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.event_name.is_empty() {
            return Err(crate::error::Error::InvalidEvent(
                "event_name is required".to_string(),
            ));
        }
        if self.source_id.is_empty() {
            return Err(crate::error::Error::InvalidEvent(
                "source_id is required".to_string(),
            ));
        }
        let known_source = self.source_id.starts_with(AGENT_PREFIX)
            || self.source_id.starts_with(MOD_PREFIX)
            || self.source_id.starts_with("system:");
        if !known_source {
            return Err(crate::error::Error::InvalidEvent(format!(
                "unrecognized source_id prefix: {}",
                self.source_id
            )));
        }
        Ok(())
    }

    /// Copy for delivery: the recipient never sees the producer's secret.
    pub fn for_delivery(&self) -> Event {
        let mut out = self.clone();
        out.secret = None;
        out
    }
}
