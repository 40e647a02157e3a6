//! Thread messaging mod
//!
//! Handles the `thread.*` event family: channel posts, replies, and
//! reactions, direct-message thread hints and recipient notifications,
//! and admin-only channel announcements.
//!
//! Channel posts pass through so the gateway can fan them out to channel
//! subscribers; announcement operations answer the submitter directly.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::core::context::NetworkContext;
use crate::core::event::{names, Destination, Event};
use crate::core::response::EventResponse;
use crate::error::Result;

use super::{ModOutcome, NetworkMod};

/// Permission a group needs to set announcements
const ANNOUNCEMENT_PERMISSION: &str = "manage_announcements";

/// The built-in messaging mod
pub struct MessagingMod {
    #[allow(dead_code)]
    config: Map<String, Value>,
}

impl MessagingMod {
    pub fn new(config: Map<String, Value>) -> Self {
        MessagingMod { config }
    }

    fn channel_of(event: &Event) -> Option<String> {
        event
            .channel_target()
            .or_else(|| {
                event
                    .payload
                    .get("channel")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }

    async fn set_announcement(&self, event: &Event, ctx: &NetworkContext) -> EventResponse {
        if !ctx.source_has_permission(event, ANNOUNCEMENT_PERMISSION) {
            return EventResponse::error("forbidden");
        }
        let Some(channel) = Self::channel_of(event) else {
            return EventResponse::error("invalid_event");
        };
        let text = event
            .payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ctx.channels()
            .set_announcement(&channel, &event.source_id, text.clone())
            .await;
        debug!(%channel, source = %event.source_id, "announcement set");
        EventResponse::ok_with_data(json!({"channel": channel, "text": text}))
    }

    async fn get_announcement(&self, event: &Event, ctx: &NetworkContext) -> EventResponse {
        let Some(channel) = Self::channel_of(event) else {
            return EventResponse::error("invalid_event");
        };
        let text = ctx.channels().announcement(&channel).await;
        EventResponse::ok_with_data(json!({"channel": channel, "text": text}))
    }
}

#[async_trait]
impl NetworkMod for MessagingMod {
    fn name(&self) -> &str {
        "messaging"
    }

    async fn process_direct_message(
        &self,
        mut event: Event,
        ctx: &NetworkContext,
    ) -> Result<ModOutcome> {
        let Some(Destination::Agent(peer)) = event.destination() else {
            return Ok(ModOutcome::Pass(event));
        };

        // Stamp the conversation thread so both ends bucket the exchange
        // the same way: each side keys the thread by its opponent.
        if !event.metadata.contains_key("thread") {
            event.metadata.insert(
                "thread".to_string(),
                json!(format!("direct_message:{peer}")),
            );
        }

        // Tell the recipient's thread view about the incoming message.
        // Best-effort: the durable record is the message itself.
        if let Some(sender) = event.source_agent().map(str::to_string) {
            let notification = Event::new(names::DIRECT_NOTIFICATION, "mod:messaging")
                .with_destination(format!("agent:{peer}"))
                .with_payload(json!({
                    "sender": event.source_id,
                    "thread": format!("direct_message:{sender}"),
                    "text": event.payload.get("text").cloned().unwrap_or(Value::Null),
                    "event_id": event.event_id,
                }))
                .with_metadata_entry("ephemeral", json!(true));
            let _ = ctx.emit(notification);
        }

        Ok(ModOutcome::Pass(event))
    }

    async fn process_system_message(
        &self,
        event: Event,
        ctx: &NetworkContext,
    ) -> Result<ModOutcome> {
        match event.event_name.as_str() {
            names::ANNOUNCEMENT_SET => {
                Ok(ModOutcome::Respond(self.set_announcement(&event, ctx).await))
            }
            names::ANNOUNCEMENT_GET => {
                Ok(ModOutcome::Respond(self.get_announcement(&event, ctx).await))
            }
            names::CHANNEL_POST | names::CHANNEL_REPLY | names::CHANNEL_REACTION => {
                // A post without a channel cannot be routed anywhere.
                if Self::channel_of(&event).is_none() {
                    return Ok(ModOutcome::Respond(EventResponse::error("invalid_event")));
                }
                Ok(ModOutcome::Pass(event))
            }
            _ => Ok(ModOutcome::Pass(event)),
        }
    }
}
