//! Subscription table
//!
//! A subscription is (subscriber agent id, pattern list, optional mod
//! filter). Patterns match on `event_name` and support a trailing `.*`
//! glob; `*` alone matches everything. A literal `channel:<name>` entry
//! subscribes the agent to that channel's fan-out.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::event::{Event, CHANNEL_PREFIX};

/// Match a single pattern against an event name.
///
/// `pfx.*` matches `pfx.anything` (one segment or more), not `pfx` itself.
pub fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_name.len() > prefix.len() + 1
            && event_name.starts_with(prefix)
            && event_name.as_bytes()[prefix.len()] == b'.';
    }
    pattern == event_name
}

/// One registered subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub agent_id: String,
    pub patterns: Vec<String>,
    pub mod_filter: Option<String>,
}

impl Subscription {
    /// Whether this subscription selects the event
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(filter) = &self.mod_filter {
            if event.relevant_mod.as_deref() != Some(filter.as_str()) {
                return false;
            }
        }
        let channel = event.channel_target();
        self.patterns.iter().any(|pattern| {
            if let Some(name) = pattern.strip_prefix(CHANNEL_PREFIX) {
                return channel.as_deref() == Some(name);
            }
            pattern_matches(pattern, &event.event_name)
        })
    }

    /// Whether this subscription includes the named channel
    pub fn includes_channel(&self, channel: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.strip_prefix(CHANNEL_PREFIX) == Some(channel))
    }
}

/// All live subscriptions
#[derive(Default)]
pub struct SubscriptionTable {
    subs: RwLock<HashMap<String, Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; returns its id.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        patterns: Vec<String>,
        mod_filter: Option<String>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let sub = Subscription {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            patterns,
            mod_filter,
        };
        self.subs.write().await.insert(id.clone(), sub);
        id
    }

    /// Remove a subscription. Idempotent.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subs.write().await.remove(subscription_id);
    }

    /// Remove every subscription held by an agent. Idempotent.
    pub async fn drop_agent(&self, agent_id: &str) {
        self.subs
            .write()
            .await
            .retain(|_, sub| sub.agent_id != agent_id);
    }

    /// Agents whose subscriptions select the event
    pub async fn matching_agents(&self, event: &Event) -> HashSet<String> {
        self.subs
            .read()
            .await
            .values()
            .filter(|sub| sub.matches(event))
            .map(|sub| sub.agent_id.clone())
            .collect()
    }

    /// Agents subscribed to the named channel
    pub async fn channel_subscribers(&self, channel: &str) -> HashSet<String> {
        self.subs
            .read()
            .await
            .values()
            .filter(|sub| sub.includes_channel(channel))
            .map(|sub| sub.agent_id.clone())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.subs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::names;
    use serde_json::json;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "anything.at.all"));
        assert!(pattern_matches("agent.message", "agent.message"));
        assert!(!pattern_matches("agent.message", "agent.message.text"));
        assert!(pattern_matches("agent.*", "agent.message"));
        assert!(pattern_matches("agent.*", "agent.direct_message.text"));
        assert!(!pattern_matches("agent.*", "agent"));
        assert!(!pattern_matches("agent.*", "agentx.message"));
    }

    #[tokio::test]
    async fn test_subscribe_and_match() {
        let table = SubscriptionTable::new();
        table
            .subscribe("a", vec!["project.*".to_string()], None)
            .await;
        let event = Event::new("project.complete", "agent:x");
        let agents = table.matching_agents(&event).await;
        assert!(agents.contains("a"));

        let event = Event::new("forum.post", "agent:x");
        assert!(table.matching_agents(&event).await.is_empty());
    }

    #[tokio::test]
    async fn test_mod_filter_restricts() {
        let table = SubscriptionTable::new();
        table
            .subscribe(
                "a",
                vec!["*".to_string()],
                Some("messaging".to_string()),
            )
            .await;

        let plain = Event::new("x.y", "agent:b");
        assert!(table.matching_agents(&plain).await.is_empty());

        let pinned = Event::new("x.y", "agent:b").with_relevant_mod("messaging");
        assert!(table.matching_agents(&pinned).await.contains("a"));
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let table = SubscriptionTable::new();
        table
            .subscribe("a", vec!["channel:general".to_string()], None)
            .await;

        assert!(table.channel_subscribers("general").await.contains("a"));
        assert!(table.channel_subscribers("random").await.is_empty());

        let post = Event::new(names::CHANNEL_POST, "agent:b")
            .with_payload(json!({"channel": "general", "text": "hi"}));
        assert!(table.matching_agents(&post).await.contains("a"));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let table = SubscriptionTable::new();
        let id = table.subscribe("a", vec!["*".to_string()], None).await;
        table.unsubscribe(&id).await;
        table.unsubscribe(&id).await;
        table.drop_agent("a").await;
        assert_eq!(table.count().await, 0);
    }
}
