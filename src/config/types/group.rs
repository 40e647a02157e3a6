//! Agent group configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named group agents are assigned to at registration.
///
/// Assignment is by password hash match; the hash itself never leaves the
/// node (the health endpoint reports name, description, and metadata only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroupConfig {
    /// Shared password hash agents present to join this group
    pub password_hash: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Open metadata; mods consult `permissions` for authorization
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentGroupConfig {
    /// Permission labels from the group metadata
    pub fn permissions(&self) -> Vec<String> {
        self.metadata
            .get("permissions")
            .and_then(Value::as_array)
            .map(|perms| {
                perms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the group carries the named permission, directly or via `all`
    pub fn has_permission(&self, permission: &str) -> bool {
        let perms = self.permissions();
        perms.iter().any(|p| p == permission || p == "all")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_with(perms: Value) -> AgentGroupConfig {
        let mut metadata = Map::new();
        metadata.insert("permissions".to_string(), perms);
        AgentGroupConfig {
            password_hash: "hash".to_string(),
            description: None,
            metadata,
        }
    }

    #[test]
    fn test_permissions() {
        let admin = group_with(json!(["all"]));
        assert!(admin.has_permission("manage_announcements"));

        let user = group_with(json!(["read", "write"]));
        assert!(user.has_permission("write"));
        assert!(!user.has_permission("manage_announcements"));
    }
}
