//! Channel directory
//!
//! Channels are logical fan-out topics created on first post or explicit
//! create. They own no storage; channel messages live in the workspace
//! event log. The directory tracks existence, creator, and the optional
//! announcement text the messaging mod manages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    /// Admin-set announcement text
    #[serde(default)]
    pub announcement: Option<String>,
}

/// Shared registry of channels
#[derive(Default)]
pub struct ChannelDirectory {
    channels: RwLock<HashMap<String, ChannelRecord>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel if it does not exist. Returns true when this
    /// call created it.
    pub async fn ensure(&self, name: &str, creator: &str) -> bool {
        let mut channels = self.channels.write().await;
        if channels.contains_key(name) {
            return false;
        }
        channels.insert(
            name.to_string(),
            ChannelRecord {
                name: name.to_string(),
                creator: creator.to_string(),
                created_at: Utc::now(),
                announcement: None,
            },
        );
        true
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    /// Set the announcement, creating the channel if needed.
    pub async fn set_announcement(&self, name: &str, creator: &str, text: String) {
        let mut channels = self.channels.write().await;
        let record = channels
            .entry(name.to_string())
            .or_insert_with(|| ChannelRecord {
                name: name.to_string(),
                creator: creator.to_string(),
                created_at: Utc::now(),
                announcement: None,
            });
        record.announcement = Some(text);
    }

    pub async fn announcement(&self, name: &str) -> Option<String> {
        self.channels
            .read()
            .await
            .get(name)
            .and_then(|c| c.announcement.clone())
    }

    pub async fn list(&self) -> Vec<ChannelRecord> {
        let mut out: Vec<ChannelRecord> =
            self.channels.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
