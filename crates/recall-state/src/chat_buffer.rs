//! Chat-style memory adaptor over [`MemoryStore`].

use serde_json::{json, Map, Value};

use crate::memory_store::MemoryStore;
use crate::schema::ConversationRecord;
use crate::storage_traits::StorageResult;

/// Variable name the rendered buffer is exposed under.
pub const MEMORY_KEY: &str = "chat_history";

/// Tag on chat turns, shared with other writers of the same namespace.
const ENTRY_TYPE: &str = "langchain_context";
/// Older tag for chat turns, still accepted on read.
const LEGACY_ENTRY_TYPE: &str = "chat_context";
const BUFFER_WINDOW: usize = 10;

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Input/output turns stored in an agent's conversation history.
#[derive(Clone)]
pub struct ConversationBuffer {
    store: MemoryStore,
    agent_id: String,
}

impl ConversationBuffer {
    pub fn new(store: MemoryStore, agent_id: impl Into<String>) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
        }
    }

    pub async fn save_context(
        &self,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
    ) -> StorageResult<()> {
        self.store
            .store_conversation(
                &self.agent_id,
                json!({
                    "type": ENTRY_TYPE,
                    "inputs": inputs,
                    "outputs": outputs,
                }),
            )
            .await
    }

    /// Recent turns rendered as `Human:` / `AI:` lines, oldest first.
    /// Conversation entries written by other producers are ignored.
    pub async fn buffer(&self) -> StorageResult<String> {
        let history = self
            .store
            .get_conversation_history(&self.agent_id, BUFFER_WINDOW)
            .await?;

        let mut lines = Vec::new();
        for entry in history.iter().rev().filter(|e| is_chat_turn(e)) {
            if let Some(inputs) = entry.data.get("inputs").and_then(Value::as_object) {
                lines.extend(inputs.values().map(|v| format!("Human: {}", render(v))));
            }
            if let Some(outputs) = entry.data.get("outputs").and_then(Value::as_object) {
                lines.extend(outputs.values().map(|v| format!("AI: {}", render(v))));
            }
        }
        Ok(lines.join("\n"))
    }

    /// The buffer keyed by [`MEMORY_KEY`].
    pub async fn load_memory_variables(&self) -> StorageResult<Map<String, Value>> {
        let mut vars = Map::new();
        vars.insert(MEMORY_KEY.to_string(), Value::String(self.buffer().await?));
        Ok(vars)
    }

    /// Drop the agent's whole memory.
    pub async fn clear(&self) -> StorageResult<()> {
        self.store.clear_agent_memory(&self.agent_id).await.map(|_| ())
    }
}

fn is_chat_turn(entry: &ConversationRecord) -> bool {
    matches!(
        entry.data.get("type").and_then(Value::as_str),
        Some(ENTRY_TYPE | LEGACY_ENTRY_TYPE)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryKvBackend;
    use crate::keys::KeySpace;
    use std::sync::Arc;

    fn turn(key: &str, text: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), Value::String(text.to_string()));
        map
    }

    #[tokio::test]
    async fn test_buffer_renders_oldest_first() {
        let store = MemoryStore::new(Arc::new(MemoryKvBackend::new()), KeySpace::new(None));
        let chat = ConversationBuffer::new(store.clone(), "agent");

        chat.save_context(turn("input", "hi"), turn("output", "hello"))
            .await
            .unwrap();
        store
            .store_conversation("agent", json!({"type": "other"}))
            .await
            .unwrap();
        chat.save_context(turn("input", "hash rate?"), turn("output", "42 kH/s"))
            .await
            .unwrap();

        assert_eq!(
            chat.buffer().await.unwrap(),
            "Human: hi\nAI: hello\nHuman: hash rate?\nAI: 42 kH/s"
        );

        chat.clear().await.unwrap();
        assert_eq!(chat.buffer().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_buffer_reads_both_turn_tags() {
        let store = MemoryStore::new(Arc::new(MemoryKvBackend::new()), KeySpace::new(None));
        let chat = ConversationBuffer::new(store.clone(), "agent");

        store
            .store_conversation(
                "agent",
                json!({"type": "chat_context", "inputs": {"input": "old"}, "outputs": {}}),
            )
            .await
            .unwrap();
        chat.save_context(turn("input", "new"), Map::new()).await.unwrap();

        let latest = store.get_conversation_history("agent", 1).await.unwrap();
        assert_eq!(latest[0].data["type"], "langchain_context");
        assert_eq!(chat.buffer().await.unwrap(), "Human: old\nHuman: new");
    }
}
