//! Substring recall over an agent's recent memory.
//!
//! This is a linear fallback, not a ranked retrieval engine: it scans a
//! bounded window of recent records and tags hits with a fixed relevance
//! label per record kind.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory_store::MemoryStore;
use crate::schema::{encode, ConversationRecord, DecisionRecord};
use crate::storage_traits::StorageResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
}

/// A record returned by a memory search, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MemoryRecord {
    Conversation(ConversationRecord),
    Decision(DecisionRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub relevance: Relevance,
    #[serde(flatten)]
    pub record: MemoryRecord,
}

/// Whether the serialized record contains `needle` (already lowercased).
pub(crate) fn matches_query<T: Serialize>(record: &T, needle: &str) -> bool {
    encode(record)
        .map(|text| text.to_lowercase().contains(needle))
        .unwrap_or(false)
}

impl MemoryStore {
    /// Case-insensitive substring search over the agent's recent
    /// conversations (`high`) and decisions (`medium`).
    ///
    /// Scans `limit * 2` of each kind; conversation hits come first. Only
    /// records belonging to `agent_id` are ever returned.
    pub async fn search_memory(
        &self,
        query: &str,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<SearchHit>> {
        let window = limit.saturating_mul(2);
        let needle = query.to_lowercase();

        let conversations = self.get_conversation_history(agent_id, window).await?;
        let decisions = self.get_recent_decisions(agent_id, window).await?;

        let mut hits: Vec<SearchHit> = conversations
            .into_iter()
            .filter(|record| matches_query(record, &needle))
            .map(|record| SearchHit {
                relevance: Relevance::High,
                record: MemoryRecord::Conversation(record),
            })
            .chain(
                decisions
                    .into_iter()
                    .filter(|record| matches_query(record, &needle))
                    .map(|record| SearchHit {
                        relevance: Relevance::Medium,
                        record: MemoryRecord::Decision(record),
                    }),
            )
            .collect();
        hits.truncate(limit);

        debug!(query = %query, agent_id = %agent_id, count = hits.len(), "Searched memory");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::next_stamp;
    use serde_json::json;

    #[test]
    fn test_matches_query_is_case_insensitive() {
        let record = ConversationRecord::new("a", json!({"note": "Mining XMR"}), next_stamp());
        assert!(matches_query(&record, "mining"));
        assert!(matches_query(&record, "xmr"));
        assert!(!matches_query(&record, "staking"));
    }

    #[test]
    fn test_hit_serialization_shape() {
        let hit = SearchHit {
            relevance: Relevance::High,
            record: MemoryRecord::Conversation(ConversationRecord::new(
                "a",
                json!({"n": 1}),
                next_stamp(),
            )),
        };
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["relevance"], "high");
        assert_eq!(value["type"], "conversation");
        assert_eq!(value["data"]["agent_id"], "a");
    }
}
