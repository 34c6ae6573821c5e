//! Agent-level checkpoints that carry conversation memory along.
//!
//! `AgentStateManager` bundles an agent's state with its recent
//! conversation history into one checkpoint, and replays that history
//! back into the memory store on restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::checkpoint::CheckpointManager;
use crate::error::StorageError;
use crate::memory_store::MemoryStore;
use crate::schema::{
    CheckpointId, CheckpointRecord, ConversationRecord, DecisionRecord, ThreadStatistics,
};
use crate::storage_traits::StorageResult;

/// Agent whose memory is bundled when none is configured.
pub const DEFAULT_AGENT_ID: &str = "langgraph_agent";

const BUNDLED_HISTORY: usize = 20;
const CONTEXT_HISTORY: usize = 10;
const CONTEXT_DECISIONS: usize = 5;
const STATE_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleContext {
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Checkpoint payload written by [`AgentStateManager::save_agent_state`]
///
/// Every field is optional on read, so any checkpoint restores: one
/// without a bundle comes back as `{}` with no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateBundle {
    #[serde(default = "empty_object")]
    pub agent_state: Value,
    /// Newest first, as read at save time
    #[serde(default)]
    pub conversation_history: Vec<ConversationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_context: Option<BundleContext>,
}

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoredAgentState {
    pub agent_state: Value,
    pub restored_conversations: usize,
    pub checkpoint_metadata: Value,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything an agent needs to pick a thread back up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub thread_id: String,
    pub latest_checkpoint: Option<CheckpointRecord>,
    pub conversation_history: Vec<ConversationRecord>,
    pub thread_statistics: ThreadStatistics,
    pub recent_decisions: Vec<DecisionRecord>,
    pub timestamp: DateTime<Utc>,
}

fn state_summary(state: &Value) -> String {
    state.to_string().chars().take(STATE_SUMMARY_CHARS).collect()
}

/// Checkpoints plus conversation memory for a single agent
#[derive(Clone)]
pub struct AgentStateManager {
    memory: MemoryStore,
    checkpoints: CheckpointManager,
    agent_id: String,
}

impl AgentStateManager {
    pub fn new(memory: MemoryStore) -> Self {
        let checkpoints = CheckpointManager::from_store(&memory);
        Self {
            memory,
            checkpoints,
            agent_id: DEFAULT_AGENT_ID.to_string(),
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Checkpoint `state` together with the agent's recent conversations,
    /// then note the checkpoint in the conversation log.
    pub async fn save_agent_state(
        &self,
        thread_id: &str,
        state: Value,
        metadata: Option<Value>,
    ) -> StorageResult<CheckpointId> {
        let conversation_history = self
            .memory
            .get_conversation_history(&self.agent_id, BUNDLED_HISTORY)
            .await?;
        let summary = state_summary(&state);
        let bundle = AgentStateBundle {
            agent_state: state,
            conversation_history,
            memory_context: Some(BundleContext {
                thread_id: thread_id.to_string(),
                timestamp: Utc::now(),
            }),
        };

        let checkpoint_id = self
            .checkpoints
            .save_checkpoint(thread_id, serde_json::to_value(&bundle)?, metadata)
            .await?;

        self.memory
            .store_conversation(
                &self.agent_id,
                json!({
                    "type": "state_checkpoint",
                    "checkpoint_id": checkpoint_id,
                    "thread_id": thread_id,
                    "state_summary": summary,
                }),
            )
            .await?;

        debug!(agent_id = %self.agent_id, checkpoint_id = %checkpoint_id, "Saved agent state");
        Ok(checkpoint_id)
    }

    /// Load an agent checkpoint and replay its bundled conversations.
    ///
    /// History is replayed oldest first, so the bundled newest entry is
    /// newest again after the restore.
    pub async fn restore_agent_state(
        &self,
        checkpoint_id: &str,
    ) -> StorageResult<Option<RestoredAgentState>> {
        let Some(restored) = self.checkpoints.restore_from_checkpoint(checkpoint_id).await? else {
            return Ok(None);
        };
        let bundle = match restored.state {
            Value::Object(_) => serde_json::from_value::<AgentStateBundle>(restored.state)
                .map_err(|e| StorageError::Deserialization(e.to_string()))?,
            _ => AgentStateBundle {
                agent_state: empty_object(),
                conversation_history: Vec::new(),
                memory_context: None,
            },
        };

        let restored_conversations = bundle.conversation_history.len();
        for entry in bundle.conversation_history.into_iter().rev() {
            self.memory.store_conversation(&self.agent_id, entry.data).await?;
        }

        info!(
            agent_id = %self.agent_id,
            checkpoint_id = %checkpoint_id,
            restored_conversations,
            "Restored agent state"
        );
        Ok(Some(RestoredAgentState {
            agent_state: bundle.agent_state,
            restored_conversations,
            checkpoint_metadata: restored.metadata,
            thread_id: restored.thread_id,
            timestamp: restored.timestamp,
        }))
    }

    pub async fn get_memory_context(&self, thread_id: &str) -> StorageResult<MemoryContext> {
        Ok(MemoryContext {
            thread_id: thread_id.to_string(),
            latest_checkpoint: self.checkpoints.get_latest_checkpoint(thread_id).await?,
            conversation_history: self
                .memory
                .get_conversation_history(&self.agent_id, CONTEXT_HISTORY)
                .await?,
            thread_statistics: self.checkpoints.get_thread_statistics(thread_id).await?,
            recent_decisions: self
                .memory
                .get_recent_decisions(&self.agent_id, CONTEXT_DECISIONS)
                .await?,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_summary_truncates_on_chars() {
        let long = json!({ "text": "é".repeat(500) });
        let summary = state_summary(&long);
        assert_eq!(summary.chars().count(), STATE_SUMMARY_CHARS);

        let short = json!({"n": 1});
        assert_eq!(state_summary(&short), r#"{"n":1}"#);
    }

    #[test]
    fn test_bundle_fields_default_on_read() {
        let bundle: AgentStateBundle = serde_json::from_value(json!({"step": 1})).unwrap();
        assert_eq!(bundle.agent_state, json!({}));
        assert!(bundle.conversation_history.is_empty());
        assert!(bundle.memory_context.is_none());
    }
}
