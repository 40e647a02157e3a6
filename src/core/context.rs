//! Network context - the narrow interface mods see
//!
//! Mods never hold the network object. They receive a [`NetworkContext`]
//! exposing only what a mod needs: emitting events back into the gateway,
//! persisting through the workspace, enumerating agents, consulting group
//! permissions, and a private storage subtree. This breaks the
//! mod-to-network ownership cycle and makes mod tests trivial.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::AuthManager;
use crate::core::event::Event;
use crate::error::{Error, Result};
use crate::gateway::channels::ChannelDirectory;
use crate::workspace::WorkspaceStore;

/// Shared context handed to every mod processor
#[derive(Clone)]
pub struct NetworkContext {
    network_name: String,
    network_id: String,
    auth: Arc<AuthManager>,
    workspace: Arc<WorkspaceStore>,
    channels: Arc<ChannelDirectory>,
    emitter: mpsc::UnboundedSender<Event>,
}

impl NetworkContext {
    pub fn new(
        network_name: impl Into<String>,
        network_id: impl Into<String>,
        auth: Arc<AuthManager>,
        workspace: Arc<WorkspaceStore>,
        channels: Arc<ChannelDirectory>,
        emitter: mpsc::UnboundedSender<Event>,
    ) -> Self {
        NetworkContext {
            network_name: network_name.into(),
            network_id: network_id.into(),
            auth,
            workspace,
            channels,
            emitter,
        }
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Emit an event into the gateway. The event is queued and submitted
    /// asynchronously; mod-sourced events bypass secret verification
    /// because they can only originate in-process.
    pub fn emit(&self, event: Event) -> Result<()> {
        self.emitter
            .send(event)
            .map_err(|_| Error::Internal("event pump is gone".to_string()))
    }

    /// Persist an event through the workspace store
    pub async fn persist_event(&self, event: &Event) -> Result<()> {
        self.workspace.append_event(event).await
    }

    /// Ids of all registered agents
    pub async fn agent_ids(&self) -> Vec<String> {
        self.auth.agent_ids().await
    }

    /// The group an agent was assigned at registration
    pub async fn agent_group(&self, agent_id: &str) -> Option<String> {
        self.auth.group_of(agent_id).await
    }

    /// Whether a group's metadata carries the permission (or `all`)
    pub fn group_has_permission(&self, group: &str, permission: &str) -> bool {
        self.auth
            .group_config(group)
            .map(|g| g.has_permission(permission))
            .unwrap_or(false)
    }

    /// Whether the event's source may perform a permission-gated
    /// operation: system and mod sources always may, agents by their
    /// stamped group.
    pub fn source_has_permission(&self, event: &Event, permission: &str) -> bool {
        if event.is_system_source() || event.is_mod_source() {
            return true;
        }
        event
            .source_agent_group
            .as_deref()
            .map(|group| self.group_has_permission(group, permission))
            .unwrap_or(false)
    }

    /// The channel directory
    pub fn channels(&self) -> &ChannelDirectory {
        &self.channels
    }

    /// The workspace store
    pub fn workspace(&self) -> &Arc<WorkspaceStore> {
        &self.workspace
    }

    /// Private storage subtree for a mod, created on first use
    pub fn mod_storage_path(&self, mod_path: &str) -> Result<PathBuf> {
        self.workspace.mod_storage_path(mod_path)
    }
}
