//! Auth & Group Manager
//!
//! Owns agent identity: registration with group assignment by password
//! hash, per-agent secret issuance, and secret verification for inbound
//! events. Secrets live in memory only; a restarted node invalidates them
//! and agents must re-register.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::AgentGroupConfig;
use crate::core::event::AGENT_PREFIX;
use crate::error::{Error, Result};
use crate::transport::TransportKind;

/// Length of issued agent secrets
const SECRET_LEN: usize = 64;

/// Hash a group password the way the node stores it (hex SHA-256).
/// Clients and operators use the same helper so hashes agree.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// Records
// ============================================================================

/// One registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent id (without the `agent:` prefix)
    pub agent_id: String,
    /// Transport the agent registered over
    pub transport: TransportKind,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Last time the agent was seen on the wire
    pub last_seen: DateTime<Utc>,
    /// Arbitrary agent metadata
    pub metadata: Map<String, Value>,
    /// Assigned group name
    pub group: String,
    /// Whether the agent currently holds a live connection or queue
    pub connected: bool,
    /// Issued secret; never serialized
    #[serde(skip)]
    pub secret: Option<String>,
}

/// Registration request, shared by both transports
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub agent_id: String,
    pub transport: TransportKind,
    pub metadata: Map<String, Value>,
    pub password_hash: Option<String>,
    pub force_reconnect: bool,
}

impl RegistrationRequest {
    pub fn new(agent_id: impl Into<String>, transport: TransportKind) -> Self {
        RegistrationRequest {
            agent_id: agent_id.into(),
            transport,
            metadata: Map::new(),
            password_hash: None,
            force_reconnect: false,
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn force(mut self) -> Self {
        self.force_reconnect = true;
        self
    }
}

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct RegistrationGrant {
    /// Issued secret the agent presents on every event
    pub secret: String,
    /// Assigned group
    pub group: String,
    /// Record of the evicted prior registration, when force_reconnect
    /// replaced one
    pub evicted: Option<AgentRecord>,
}

// ============================================================================
// Manager
// ============================================================================

/// Auth & Group Manager
pub struct AuthManager {
    groups: HashMap<String, AgentGroupConfig>,
    default_group: String,
    requires_password: bool,
    #[cfg(feature = "insecure-auth")]
    verify_secrets: bool,
    records: RwLock<HashMap<String, AgentRecord>>,
}

impl AuthManager {
    /// Build from the group section of a network config
    pub fn new(
        groups: HashMap<String, AgentGroupConfig>,
        default_group: impl Into<String>,
        requires_password: bool,
    ) -> Self {
        AuthManager {
            groups,
            default_group: default_group.into(),
            requires_password,
            #[cfg(feature = "insecure-auth")]
            verify_secrets: true,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Disable secret verification. Only compiled into `insecure-auth`
    /// builds; production binaries have no way to reach this state.
    #[cfg(feature = "insecure-auth")]
    pub fn disable_secret_verification(&mut self) {
        tracing::warn!("agent secret verification is DISABLED; do not run this build in production");
        self.verify_secrets = false;
    }

    fn secrets_enforced(&self) -> bool {
        #[cfg(feature = "insecure-auth")]
        {
            self.verify_secrets
        }
        #[cfg(not(feature = "insecure-auth"))]
        {
            true
        }
    }

    /// Resolve the group for a presented password hash.
    fn resolve_group(&self, presented: Option<&str>) -> Result<String> {
        if let Some(hash) = presented {
            let matches: Vec<&String> = self
                .groups
                .iter()
                .filter(|(_, g)| {
                    g.password_hash.as_bytes().ct_eq(hash.as_bytes()).into()
                })
                .map(|(name, _)| name)
                .collect();
            match matches.as_slice() {
                [name] => return Ok((*name).clone()),
                [] => {}
                _ => {
                    return Err(Error::AuthenticationRequired(
                        "password hash matches more than one group".to_string(),
                    ))
                }
            }
        }
        if self.requires_password {
            return Err(Error::AuthenticationRequired(
                "this network requires a group password".to_string(),
            ));
        }
        Ok(self.default_group.clone())
    }

    /// Register an agent: assign a group, issue a secret, store the record.
    pub async fn register_agent(&self, req: RegistrationRequest) -> Result<RegistrationGrant> {
        if req.agent_id.is_empty() {
            return Err(Error::InvalidEvent("agent_id is required".to_string()));
        }
        let group = self.resolve_group(req.password_hash.as_deref())?;

        let mut records = self.records.write().await;
        let evicted = match records.get(&req.agent_id) {
            Some(_) if !req.force_reconnect => {
                return Err(Error::DuplicateAgent(req.agent_id.clone()));
            }
            Some(_) => {
                debug!(agent_id = %req.agent_id, "evicting prior registration (force_reconnect)");
                records.remove(&req.agent_id)
            }
            None => None,
        };

        let secret = generate_secret();
        let now = Utc::now();
        records.insert(
            req.agent_id.clone(),
            AgentRecord {
                agent_id: req.agent_id.clone(),
                transport: req.transport,
                registered_at: now,
                last_seen: now,
                metadata: req.metadata,
                group: group.clone(),
                connected: true,
                secret: Some(secret.clone()),
            },
        );
        info!(agent_id = %req.agent_id, %group, transport = ?req.transport, "agent registered");

        Ok(RegistrationGrant {
            secret,
            group,
            evicted,
        })
    }

    /// Verify a source id and secret against the stored record.
    ///
    /// System sources bypass validation unconditionally. Mod sources bypass
    /// too; the gateway guarantees they can only originate in-process (the
    /// transports substitute the connection's agent id on every inbound
    /// frame).
    pub async fn validate(&self, source_id: &str, secret: Option<&str>) -> bool {
        if source_id.starts_with("system:") || source_id.starts_with("mod:") {
            return true;
        }
        let Some(agent_id) = source_id.strip_prefix(AGENT_PREFIX) else {
            return false;
        };
        if !self.secrets_enforced() {
            return true;
        }
        let Some(presented) = secret else {
            return false;
        };
        let records = self.records.read().await;
        let Some(stored) = records.get(agent_id).and_then(|r| r.secret.as_deref()) else {
            return false;
        };
        stored.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    /// Unregister an agent. Requires a valid secret so disconnection cannot
    /// be spoofed by another agent.
    pub async fn unregister(&self, agent_id: &str, secret: &str) -> Result<AgentRecord> {
        let source = format!("{AGENT_PREFIX}{agent_id}");
        if !self.validate(&source, Some(secret)).await {
            return Err(Error::AuthenticationFailed(format!(
                "invalid secret for agent {agent_id}"
            )));
        }
        self.remove(agent_id).await
    }

    /// Remove an agent without secret verification. For transport-observed
    /// disconnects only; never reachable from the wire.
    pub async fn remove(&self, agent_id: &str) -> Result<AgentRecord> {
        let mut records = self.records.write().await;
        records
            .remove(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))
    }

    /// Re-insert a record recovered from the workspace. Recovered agents
    /// hold no secret and are marked disconnected.
    pub async fn restore(&self, mut record: AgentRecord) {
        record.secret = None;
        record.connected = false;
        let mut records = self.records.write().await;
        records.entry(record.agent_id.clone()).or_insert(record);
    }

    /// Update an agent's last-seen stamp
    pub async fn touch(&self, agent_id: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(agent_id) {
            record.last_seen = Utc::now();
        }
    }

    /// Whether the agent is currently registered
    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.records.read().await.contains_key(agent_id)
    }

    /// Ids of all registered agents
    pub async fn agent_ids(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Snapshot of all records (secrets stripped)
    pub async fn records_snapshot(&self) -> Vec<AgentRecord> {
        self.records
            .read()
            .await
            .values()
            .map(|r| {
                let mut out = r.clone();
                out.secret = None;
                out
            })
            .collect()
    }

    /// The group an agent was assigned, if registered
    pub async fn group_of(&self, agent_id: &str) -> Option<String> {
        self.records
            .read()
            .await
            .get(agent_id)
            .map(|r| r.group.clone())
    }

    /// Configuration of a named group
    pub fn group_config(&self, group: &str) -> Option<&AgentGroupConfig> {
        self.groups.get(group)
    }

    /// All configured groups
    pub fn groups(&self) -> &HashMap<String, AgentGroupConfig> {
        &self.groups
    }

    /// The configured default group name
    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    /// Current membership, group name -> agent ids
    pub async fn membership(&self) -> HashMap<String, Vec<String>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for record in self.records.read().await.values() {
            out.entry(record.group.clone())
                .or_default()
                .push(record.agent_id.clone());
        }
        for ids in out.values_mut() {
            ids.sort();
        }
        out
    }

    /// Number of registered agents
    pub async fn agent_count(&self) -> usize {
        self.records.read().await.len()
    }
}

/// Generate a cryptographically strong 64-character alphanumeric secret
fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager_with_groups(requires_password: bool) -> AuthManager {
        let mut groups = HashMap::new();
        let mut metadata = Map::new();
        metadata.insert("permissions".to_string(), json!(["all"]));
        groups.insert(
            "admins".to_string(),
            AgentGroupConfig {
                password_hash: hash_password("admin_password"),
                description: Some("Administrators".to_string()),
                metadata,
            },
        );
        groups.insert(
            "users".to_string(),
            AgentGroupConfig {
                password_hash: hash_password("user_password"),
                description: None,
                metadata: Map::new(),
            },
        );
        AuthManager::new(groups, "guests", requires_password)
    }

    #[tokio::test]
    async fn test_register_with_matching_hash_assigns_group() {
        let auth = manager_with_groups(false);
        let grant = auth
            .register_agent(
                RegistrationRequest::new("admin-1", TransportKind::Http)
                    .with_password_hash(hash_password("admin_password")),
            )
            .await
            .unwrap();
        assert_eq!(grant.group, "admins");
        assert_eq!(grant.secret.len(), SECRET_LEN);
        assert_eq!(auth.group_of("admin-1").await.as_deref(), Some("admins"));
    }

    #[tokio::test]
    async fn test_register_without_hash_gets_default_group() {
        let auth = manager_with_groups(false);
        let grant = auth
            .register_agent(RegistrationRequest::new("guest-1", TransportKind::Http))
            .await
            .unwrap();
        assert_eq!(grant.group, "guests");
    }

    #[tokio::test]
    async fn test_register_with_wrong_hash_gets_default_group() {
        let auth = manager_with_groups(false);
        let grant = auth
            .register_agent(
                RegistrationRequest::new("guest-2", TransportKind::Http)
                    .with_password_hash("not_a_real_hash"),
            )
            .await
            .unwrap();
        assert_eq!(grant.group, "guests");
    }

    #[tokio::test]
    async fn test_requires_password_rejects_unauthenticated() {
        let auth = manager_with_groups(true);
        let err = auth
            .register_agent(RegistrationRequest::new("guest-3", TransportKind::Http))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authentication_required");

        // A matching hash still succeeds
        let grant = auth
            .register_agent(
                RegistrationRequest::new("user-1", TransportKind::Http)
                    .with_password_hash(hash_password("user_password")),
            )
            .await
            .unwrap();
        assert_eq!(grant.group, "users");
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected_without_force() {
        let auth = manager_with_groups(false);
        let req = RegistrationRequest::new("dup", TransportKind::Http);
        auth.register_agent(req.clone()).await.unwrap();
        let err = auth.register_agent(req.clone()).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_agent");

        let grant = auth.register_agent(req.force()).await.unwrap();
        assert!(grant.evicted.is_some());
    }

    #[tokio::test]
    async fn test_validate_secret() {
        let auth = manager_with_groups(false);
        let grant = auth
            .register_agent(RegistrationRequest::new("a", TransportKind::Http))
            .await
            .unwrap();

        assert!(auth.validate("agent:a", Some(&grant.secret)).await);
        assert!(!auth.validate("agent:a", Some("BOGUS")).await);
        assert!(!auth.validate("agent:a", None).await);
        assert!(!auth.validate("agent:unknown", Some(&grant.secret)).await);
        // System and mod sources bypass
        assert!(auth.validate("system:system", None).await);
        assert!(auth.validate("mod:messaging", None).await);
    }

    #[tokio::test]
    async fn test_unregister_requires_valid_secret() {
        let auth = manager_with_groups(false);
        let grant = auth
            .register_agent(RegistrationRequest::new("a", TransportKind::Http))
            .await
            .unwrap();

        let err = auth.unregister("a", "BOGUS").await.unwrap_err();
        assert_eq!(err.code(), "authentication_failed");
        assert!(auth.is_registered("a").await);

        auth.unregister("a", &grant.secret).await.unwrap();
        assert!(!auth.is_registered("a").await);
    }

    #[tokio::test]
    async fn test_restored_records_hold_no_secret() {
        let auth = manager_with_groups(false);
        let now = Utc::now();
        auth.restore(AgentRecord {
            agent_id: "old".to_string(),
            transport: TransportKind::Http,
            registered_at: now,
            last_seen: now,
            metadata: Map::new(),
            group: "guests".to_string(),
            connected: true,
            secret: Some("stale".to_string()),
        })
        .await;

        assert!(auth.is_registered("old").await);
        assert!(!auth.validate("agent:old", Some("stale")).await);
        let records = auth.records_snapshot().await;
        assert!(!records[0].connected);
    }

    #[test]
    fn test_hash_password_is_hex_sha256() {
        let hash = hash_password("secret");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_password("secret"));
    }
}
