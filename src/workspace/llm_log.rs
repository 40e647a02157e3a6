//! Per-agent LLM call log
//!
//! Agent runners report their LLM calls to the node, which appends them to
//! `logs/llm/<agent_id>.jsonl`. The HTTP surface exposes paginated,
//! filterable summaries plus full-entry lookup by log id.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Characters of completion text kept in a summary preview
const PREVIEW_LEN: usize = 100;

/// One logged LLM call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmLogEntry {
    #[serde(default)]
    pub log_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub model_name: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// Conversation sent to the model
    #[serde(default)]
    pub messages: Value,
    /// Tool schemas offered, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Model completion text
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compact listing row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmLogSummary {
    pub log_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub model_name: String,
    pub provider: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub has_error: bool,
    pub preview: String,
}

impl From<&LlmLogEntry> for LlmLogSummary {
    fn from(entry: &LlmLogEntry) -> Self {
        let preview = entry
            .completion
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(PREVIEW_LEN)
            .collect();
        LlmLogSummary {
            log_id: entry.log_id.clone(),
            timestamp: entry.timestamp,
            model_name: entry.model_name.clone(),
            provider: entry.provider.clone(),
            input_tokens: entry.input_tokens,
            output_tokens: entry.output_tokens,
            latency_ms: entry.latency_ms,
            has_error: entry.error.is_some(),
            preview,
        }
    }
}

/// Filters for a log listing request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmLogQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub model: Option<String>,
    pub has_error: Option<bool>,
    pub search: Option<String>,
}

/// One page of summaries
#[derive(Debug, Clone, Serialize)]
pub struct LlmLogPage {
    pub agent_id: String,
    pub logs: Vec<LlmLogSummary>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Append/query store over `logs/llm/`
pub struct LlmLogStore {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl LlmLogStore {
    pub(crate) fn new(root: PathBuf) -> Self {
        LlmLogStore {
            root,
            append_lock: Mutex::new(()),
        }
    }

    fn agent_log_path(&self, agent_id: &str) -> Result<PathBuf> {
        if agent_id.is_empty() || agent_id.contains('/') || agent_id.contains("..") {
            return Err(Error::InvalidEvent(format!("invalid agent id: {agent_id}")));
        }
        Ok(self.root.join(format!("{agent_id}.jsonl")))
    }

    /// Append a call record, stamping `log_id` and `timestamp` if absent.
    /// Returns the log id.
    pub async fn append(&self, mut entry: LlmLogEntry) -> Result<String> {
        if entry.log_id.is_empty() {
            entry.log_id = Uuid::new_v4().to_string();
        }
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Utc::now());
        }
        let path = self.agent_log_path(&entry.agent_id)?;
        let line = serde_json::to_string(&entry)?;

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::StorageUnavailable(format!("opening llm log: {e}")))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .map_err(|e| Error::StorageUnavailable(format!("appending llm log: {e}")))?;
        Ok(entry.log_id)
    }

    fn read_all(&self, agent_id: &str) -> Result<Vec<LlmLogEntry>> {
        let path = self.agent_log_path(agent_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::StorageUnavailable(format!("reading llm log: {e}")))?;
        let mut out = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<LlmLogEntry>(line) {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Paginated, filtered listing, newest first.
    pub async fn query(&self, agent_id: &str, query: &LlmLogQuery) -> Result<LlmLogPage> {
        let mut entries = self.read_all(agent_id)?;
        entries.reverse();

        let search = query.search.as_deref().map(str::to_lowercase);
        let filtered: Vec<&LlmLogEntry> = entries
            .iter()
            .filter(|e| match &query.model {
                Some(model) => &e.model_name == model,
                None => true,
            })
            .filter(|e| match query.has_error {
                Some(want) => e.error.is_some() == want,
                None => true,
            })
            .filter(|e| match &search {
                Some(needle) => {
                    let messages = serde_json::to_string(&e.messages).unwrap_or_default();
                    messages.to_lowercase().contains(needle)
                        || e.completion
                            .as_deref()
                            .unwrap_or_default()
                            .to_lowercase()
                            .contains(needle)
                }
                None => true,
            })
            .collect();

        let total_count = filtered.len();
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(50);
        let logs: Vec<LlmLogSummary> = filtered
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(LlmLogSummary::from)
            .collect();
        let has_more = offset + logs.len() < total_count;

        Ok(LlmLogPage {
            agent_id: agent_id.to_string(),
            logs,
            total_count,
            has_more,
        })
    }

    /// Full entry lookup by log id
    pub async fn get(&self, agent_id: &str, log_id: &str) -> Result<Option<LlmLogEntry>> {
        Ok(self
            .read_all(agent_id)?
            .into_iter()
            .find(|e| e.log_id == log_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LlmLogStore {
        LlmLogStore::new(dir.path().to_path_buf())
    }

    fn entry(model: &str, completion: &str, error: Option<&str>) -> LlmLogEntry {
        LlmLogEntry {
            log_id: String::new(),
            agent_id: "test_agent".to_string(),
            timestamp: None,
            model_name: model.to_string(),
            provider: Some("openai".to_string()),
            messages: json!([{"role": "user", "content": "Hi"}]),
            tools: None,
            completion: Some(completion.to_string()),
            tool_calls: None,
            input_tokens: 10,
            output_tokens: 5,
            latency_ms: 100,
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_append_creates_log_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let log_id = store.append(entry("gpt-4o", "Hello", None)).await.unwrap();
        assert!(!log_id.is_empty());
        assert!(dir.path().join("test_agent.jsonl").exists());
    }

    #[tokio::test]
    async fn test_pagination() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..10 {
            store
                .append(entry("gpt-4o", &format!("answer {i}"), None))
                .await
                .unwrap();
        }

        let page = store
            .query(
                "test_agent",
                &LlmLogQuery {
                    limit: Some(3),
                    offset: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.logs.len(), 3);
        assert_eq!(page.total_count, 10);
        assert!(page.has_more);
        // Newest first
        assert_eq!(page.logs[0].preview, "answer 9");

        let page = store
            .query(
                "test_agent",
                &LlmLogQuery {
                    limit: Some(3),
                    offset: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.logs.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_filters() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(entry("gpt-4o", "about python", None)).await.unwrap();
        store.append(entry("gpt-4o", "about rust", None)).await.unwrap();
        store
            .append(entry("claude-3", "failed", Some("rate limit")))
            .await
            .unwrap();

        let page = store
            .query(
                "test_agent",
                &LlmLogQuery {
                    model: Some("gpt-4o".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);

        let page = store
            .query(
                "test_agent",
                &LlmLogQuery {
                    has_error: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert!(page.logs[0].has_error);

        let page = store
            .query(
                "test_agent",
                &LlmLogQuery {
                    search: Some("PYTHON".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
    }

    #[tokio::test]
    async fn test_get_by_log_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let log_id = store.append(entry("gpt-4o", "Hello", None)).await.unwrap();

        let full = store.get("test_agent", &log_id).await.unwrap().unwrap();
        assert_eq!(full.completion.as_deref(), Some("Hello"));
        assert!(store.get("test_agent", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_agent_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let page = store
            .query("nobody", &LlmLogQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
        assert!(!page.has_more);
    }
}
