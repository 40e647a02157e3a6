//! Workspace store - the durable record of everything the node must
//! recover on restart
//!
//! Layout under the workspace root:
//!
//! ```text
//! manifest.json               network name, id, schema version, mod list
//! agents.jsonl                append-only register/unregister records
//! groups.json                 current membership snapshot
//! events/YYYY-MM-DD.jsonl     append-only event log, rotated by day
//! logs/llm/<agent_id>.jsonl   per-agent LLM call log
//! mods/<mod_path>/...         mod-private files, opaque to the core
//! ```
//!
//! All log writes are line-delimited JSON appended under a per-file mutex
//! and flushed per record, so a crash never leaves a torn line.

pub mod llm_log;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AgentRecord;
use crate::config::ModConfigItem;
use crate::core::event::Event;
use crate::error::{Error, Result};
use crate::transport::TransportKind;

pub use llm_log::{LlmLogEntry, LlmLogPage, LlmLogQuery, LlmLogStore, LlmLogSummary};

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

fn storage_err(context: &str, err: std::io::Error) -> Error {
    Error::StorageUnavailable(format!("{context}: {err}"))
}

// ============================================================================
// Manifest
// ============================================================================

/// The workspace manifest, written once at creation and rewritten when the
/// mod list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub network_name: String,
    pub network_id: String,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mods: Vec<ModConfigItem>,
}

/// One line of `agents.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogRecord {
    pub action: AgentLogAction,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Action recorded in an agent log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLogAction {
    Register,
    Unregister,
}

/// In-memory image rebuilt from the workspace on startup
#[derive(Debug, Default)]
pub struct RecoveredState {
    /// Agents still registered at shutdown (register without a later
    /// unregister)
    pub agents: Vec<AgentRecord>,
    /// Mod list persisted in the manifest, in pipeline order
    pub mods: Vec<ModConfigItem>,
    /// Network id from the manifest
    pub network_id: String,
}

// ============================================================================
// Store
// ============================================================================

/// The single writer for all node persistence.
pub struct WorkspaceStore {
    root: PathBuf,
    manifest: Mutex<Manifest>,
    events_lock: Mutex<()>,
    agents_lock: Mutex<()>,
    llm_logs: LlmLogStore,
}

impl WorkspaceStore {
    /// Open a workspace root, creating it if empty, and rebuild the
    /// recovered state from the manifest and agent log.
    pub fn open(root: impl Into<PathBuf>, network_name: &str) -> Result<(Self, RecoveredState)> {
        let root = root.into();
        for dir in [
            root.clone(),
            root.join("events"),
            root.join("logs").join("llm"),
            root.join("mods"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| storage_err("creating workspace dirs", e))?;
        }

        let manifest_path = root.join("manifest.json");
        let manifest = if manifest_path.exists() {
            let raw = fs::read_to_string(&manifest_path)
                .map_err(|e| storage_err("reading manifest", e))?;
            let manifest: Manifest = serde_json::from_str(&raw)?;
            if manifest.schema_version != SCHEMA_VERSION {
                return Err(Error::StorageUnavailable(format!(
                    "unsupported workspace schema version {}",
                    manifest.schema_version
                )));
            }
            info!(workspace = %root.display(), network_id = %manifest.network_id, "reopened workspace");
            manifest
        } else {
            let manifest = Manifest {
                network_name: network_name.to_string(),
                network_id: Uuid::new_v4().to_string(),
                schema_version: SCHEMA_VERSION,
                created_at: Utc::now(),
                mods: Vec::new(),
            };
            write_json_atomic(&manifest_path, &manifest)?;
            info!(workspace = %root.display(), network_id = %manifest.network_id, "initialized workspace");
            manifest
        };

        let agents = replay_agent_log(&root.join("agents.jsonl"))?;
        let recovered = RecoveredState {
            agents,
            mods: manifest.mods.clone(),
            network_id: manifest.network_id.clone(),
        };

        let llm_logs = LlmLogStore::new(root.join("logs").join("llm"));
        Ok((
            WorkspaceStore {
                root,
                manifest: Mutex::new(manifest),
                events_lock: Mutex::new(()),
                agents_lock: Mutex::new(()),
                llm_logs,
            },
            recovered,
        ))
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The per-agent LLM call log store
    pub fn llm_logs(&self) -> &LlmLogStore {
        &self.llm_logs
    }

    /// Storage subtree for a mod, created on first use. The core never
    /// introspects its contents.
    pub fn mod_storage_path(&self, mod_path: &str) -> Result<PathBuf> {
        // Dotted paths become nested directories; reject traversal.
        if mod_path.contains("..") || mod_path.contains('/') {
            return Err(Error::InvalidEvent(format!(
                "invalid mod path: {mod_path}"
            )));
        }
        let dir = self.root.join("mods").join(mod_path.replace('.', "/"));
        fs::create_dir_all(&dir).map_err(|e| storage_err("creating mod storage", e))?;
        Ok(dir)
    }

    // ------------------------------------------------------------------
    // Event log
    // ------------------------------------------------------------------

    /// Append an event to the day-rotated event log. The producer's secret
    /// is stripped before the record hits disk.
    pub async fn append_event(&self, event: &Event) -> Result<()> {
        let record = event.for_delivery();
        let day = record
            .timestamp
            .unwrap_or_else(Utc::now)
            .date_naive()
            .format("%Y-%m-%d");
        let path = self.root.join("events").join(format!("{day}.jsonl"));
        let line = serde_json::to_string(&record)?;

        let _guard = self.events_lock.lock().await;
        append_line(&path, &line).map_err(|e| storage_err("appending event", e))
    }

    /// Read every event logged on the given day, oldest first.
    pub async fn read_events_for_day(&self, day: NaiveDate) -> Result<Vec<Event>> {
        let path = self
            .root
            .join("events")
            .join(format!("{}.jsonl", day.format("%Y-%m-%d")));
        read_jsonl(&path)
    }

    /// Delete event logs older than `retain_days`. No-op when retention is
    /// unset (the default is infinite).
    pub async fn prune_event_logs(&self, retain_days: Option<u32>) -> Result<usize> {
        let Some(retain) = retain_days else {
            return Ok(0);
        };
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(retain as i64);
        let _guard = self.events_lock.lock().await;
        let mut removed = 0;
        let entries = fs::read_dir(self.root.join("events"))
            .map_err(|e| storage_err("listing event logs", e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(day) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".jsonl"))
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if day < cutoff {
                fs::remove_file(entry.path()).map_err(|e| storage_err("pruning event log", e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Agent log & group snapshot
    // ------------------------------------------------------------------

    /// Append a registration record to `agents.jsonl`.
    pub async fn log_agent_registered(&self, record: &AgentRecord) -> Result<()> {
        let line = AgentLogRecord {
            action: AgentLogAction::Register,
            agent_id: record.agent_id.clone(),
            group: Some(record.group.clone()),
            transport: Some(record.transport),
            metadata: record.metadata.clone(),
            timestamp: record.registered_at,
        };
        let _guard = self.agents_lock.lock().await;
        append_line(
            &self.root.join("agents.jsonl"),
            &serde_json::to_string(&line)?,
        )
        .map_err(|e| storage_err("appending agent record", e))
    }

    /// Append an unregistration record to `agents.jsonl`.
    pub async fn log_agent_unregistered(&self, agent_id: &str) -> Result<()> {
        let line = AgentLogRecord {
            action: AgentLogAction::Unregister,
            agent_id: agent_id.to_string(),
            group: None,
            transport: None,
            metadata: Map::new(),
            timestamp: Utc::now(),
        };
        let _guard = self.agents_lock.lock().await;
        append_line(
            &self.root.join("agents.jsonl"),
            &serde_json::to_string(&line)?,
        )
        .map_err(|e| storage_err("appending agent record", e))
    }

    /// Rewrite the `groups.json` membership snapshot.
    pub async fn write_groups_snapshot(
        &self,
        membership: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let _guard = self.agents_lock.lock().await;
        write_json_atomic(&self.root.join("groups.json"), membership)
    }

    /// Read the `groups.json` membership snapshot, if present.
    pub fn read_groups_snapshot(&self) -> Result<HashMap<String, Vec<String>>> {
        let path = self.root.join("groups.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| storage_err("reading groups", e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    // ------------------------------------------------------------------
    // Manifest
    // ------------------------------------------------------------------

    /// Persist the loaded-mod list so a restarted node rehydrates the same
    /// pipeline order.
    pub async fn set_mods(&self, mods: Vec<ModConfigItem>) -> Result<()> {
        let mut manifest = self.manifest.lock().await;
        manifest.mods = mods;
        write_json_atomic(&self.root.join("manifest.json"), &*manifest)
    }

    /// Current manifest contents
    pub async fn manifest(&self) -> Manifest {
        self.manifest.lock().await.clone()
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, raw).map_err(|e| storage_err("writing snapshot", e))?;
    fs::rename(&tmp, path).map_err(|e| storage_err("replacing snapshot", e))
}

fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| storage_err("reading log", e))?;
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => out.push(value),
            // A torn tail line from a crash is skipped, not fatal.
            Err(e) => warn!(path = %path.display(), line = idx + 1, "skipping corrupt log line: {e}"),
        }
    }
    Ok(out)
}

fn replay_agent_log(path: &Path) -> Result<Vec<AgentRecord>> {
    let records: Vec<AgentLogRecord> = read_jsonl(path)?;
    let mut live: HashMap<String, AgentRecord> = HashMap::new();
    for record in records {
        match record.action {
            AgentLogAction::Register => {
                live.insert(
                    record.agent_id.clone(),
                    AgentRecord {
                        agent_id: record.agent_id,
                        transport: record.transport.unwrap_or(TransportKind::Http),
                        registered_at: record.timestamp,
                        last_seen: record.timestamp,
                        metadata: record.metadata,
                        group: record.group.unwrap_or_default(),
                        connected: false,
                        secret: None,
                    },
                );
            }
            AgentLogAction::Unregister => {
                live.remove(&record.agent_id);
            }
        }
    }
    let mut agents: Vec<AgentRecord> = live.into_values().collect();
    agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    debug!(count = agents.len(), "replayed agent log");
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::names;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> (WorkspaceStore, RecoveredState) {
        WorkspaceStore::open(dir.path(), "TestNet").unwrap()
    }

    #[tokio::test]
    async fn test_manifest_created_and_reused() {
        let dir = TempDir::new().unwrap();
        let (store, recovered) = open_store(&dir);
        let id = recovered.network_id.clone();
        assert!(!id.is_empty());
        drop(store);

        let (_store, recovered) = open_store(&dir);
        assert_eq!(recovered.network_id, id);
    }

    #[tokio::test]
    async fn test_event_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);

        let mut event = Event::new(names::AGENT_MESSAGE, "agent:a")
            .with_destination("agent:b")
            .with_payload(json!({"text": "hi"}))
            .with_secret("should-not-persist");
        event.ensure_stamped();
        store.append_event(&event).await.unwrap();

        let day = event.timestamp.unwrap().date_naive();
        let events = store.read_events_for_day(day).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event.event_id);
        assert!(events[0].secret.is_none());
    }

    #[tokio::test]
    async fn test_agent_log_replay() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);

        let now = Utc::now();
        let record = AgentRecord {
            agent_id: "a".to_string(),
            transport: TransportKind::Http,
            registered_at: now,
            last_seen: now,
            metadata: Map::new(),
            group: "guests".to_string(),
            connected: true,
            secret: Some("s".to_string()),
        };
        store.log_agent_registered(&record).await.unwrap();
        let mut other = record.clone();
        other.agent_id = "b".to_string();
        store.log_agent_registered(&other).await.unwrap();
        store.log_agent_unregistered("a").await.unwrap();
        drop(store);

        let (_store, recovered) = open_store(&dir);
        assert_eq!(recovered.agents.len(), 1);
        assert_eq!(recovered.agents[0].agent_id, "b");
        assert_eq!(recovered.agents[0].group, "guests");
        assert!(!recovered.agents[0].connected);
        assert!(recovered.agents[0].secret.is_none());
    }

    #[tokio::test]
    async fn test_mods_persist_in_manifest() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);
        store
            .set_mods(vec![ModConfigItem {
                name: "messaging".to_string(),
                config: Map::new(),
            }])
            .await
            .unwrap();
        drop(store);

        let (_store, recovered) = open_store(&dir);
        assert_eq!(recovered.mods.len(), 1);
        assert_eq!(recovered.mods[0].name, "messaging");
    }

    #[tokio::test]
    async fn test_mod_storage_path_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);
        assert!(store.mod_storage_path("../evil").is_err());
        let path = store.mod_storage_path("openagents.mods.messaging").unwrap();
        assert!(path.starts_with(dir.path().join("mods")));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_groups_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);
        let mut membership = HashMap::new();
        membership.insert("guests".to_string(), vec!["a".to_string(), "b".to_string()]);
        store.write_groups_snapshot(&membership).await.unwrap();
        assert_eq!(store.read_groups_snapshot().unwrap(), membership);
    }
}
