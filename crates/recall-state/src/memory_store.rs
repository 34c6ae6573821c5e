//! Namespaced, bounded storage for agent memory
//!
//! Five record kinds share one backend under distinct key prefixes (see
//! [`crate::keys`]):
//! - conversation history: score-ordered, newest `conversation_limit` kept
//! - context: caller-addressed cache entries with an explicit TTL
//! - decisions: content keys with a TTL plus a per-agent ordered index
//! - knowledge: categorised entries plus a per-category id set
//! - agent state: a single overwritten snapshot per agent
//!
//! Each write is issued as one [`KvBatch`], so the content write, index
//! update, trim and expiration land together. Multi-record reads skip
//! entries that fail to decode; a missing record is `Ok(None)`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::error::StorageError;
use crate::handle::{BackendConfig, RedisHandle};
use crate::health::{self, HealthReport};
use crate::keys::{KeyPrefix, KeySpace, RESERVED_CATEGORY};
use crate::obs;
use crate::retention::{expiry_cutoff, RetentionPolicy};
use crate::schema::{
    decode, encode, next_stamp, score_of, AgentStateRecord, ContextRecord, ConversationRecord,
    DecisionId, DecisionRecord, KnowledgeRecord,
};
use crate::storage_traits::{KvBackend, KvBatch, RangeOrder, StorageResult};

/// Knowledge category used when the caller does not pick one.
pub const DEFAULT_KNOWLEDGE_CATEGORY: &str = "general";

/// Log a failed backend call with the operation and key, then pass it on.
pub(crate) fn logged<T>(op: &'static str, key: &str, result: StorageResult<T>) -> StorageResult<T> {
    result.inspect_err(|e| error!(op, key = %key, error = %e, "Backend operation failed"))
}

/// Decode raw entries, skipping the ones that do not parse.
pub(crate) fn decode_entries<T: DeserializeOwned>(key: &str, raws: Vec<String>) -> Vec<T> {
    raws.into_iter()
        .filter_map(|raw| match decode::<T>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                obs::emit_entry_skipped(key, &e);
                None
            }
        })
        .collect()
}

/// Inclusive stop rank for "the first `limit` members".
/// Limits past `isize::MAX` mean "all of them".
pub(crate) fn last_rank(limit: usize) -> isize {
    isize::try_from(limit).map_or(-1, |limit| limit - 1)
}

/// Aggregate key counts across the namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Keys in the whole logical database
    pub total_keys: u64,
    /// Keys under this store's namespace
    pub namespace_keys: u64,
    /// Keys per record family (see [`KeyPrefix::label`])
    pub key_counts: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

/// Memory store for agent long-term memory
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    policy: RetentionPolicy,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn KvBackend>, keys: KeySpace) -> Self {
        Self {
            backend,
            keys,
            policy: RetentionPolicy::default(),
        }
    }

    /// Override the default retention bounds
    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect to Redis and build a store over the configured namespace
    pub async fn connect(config: &BackendConfig) -> StorageResult<Self> {
        let handle = RedisHandle::connect(config).await?;
        Ok(Self::new(
            Arc::new(handle),
            KeySpace::new(config.namespace.as_deref()),
        ))
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    // ========== Conversations ==========

    /// Append a conversation entry, trim to the newest entries and refresh
    /// the collection TTL.
    pub async fn store_conversation(&self, agent_id: &str, data: Value) -> StorageResult<()> {
        let stamp = next_stamp();
        let key = self.keys.conversation(agent_id);
        let record = ConversationRecord::new(agent_id, data, stamp);

        let batch = KvBatch::new()
            .zadd(&key, encode(&record)?, score_of(&stamp))
            .ztrim_newest(&key, self.policy.conversation_limit)
            .expire(&key, self.policy.conversation_ttl);
        logged("store_conversation", &key, self.backend.apply(batch).await)?;

        debug!(agent_id = %agent_id, "Stored conversation entry");
        Ok(())
    }

    /// Most recent conversation entries, newest first.
    pub async fn get_conversation_history(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ConversationRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.keys.conversation(agent_id);
        let raws = logged(
            "get_conversation_history",
            &key,
            self.backend
                .zrange(&key, 0, last_rank(limit), RangeOrder::Descending)
                .await,
        )?;

        let history: Vec<ConversationRecord> = decode_entries(&key, raws);
        debug!(agent_id = %agent_id, count = history.len(), "Retrieved conversation history");
        Ok(history)
    }

    // ========== Context ==========

    /// Store a context entry that expires after `ttl` (at least one second).
    pub async fn store_context(
        &self,
        context_id: &str,
        data: Value,
        ttl: Duration,
    ) -> StorageResult<()> {
        let key = self.keys.context(context_id);
        let record = ContextRecord {
            timestamp: next_stamp(),
            context_id: context_id.to_string(),
            data,
        };
        let ttl = ttl.max(Duration::from_secs(1));

        logged(
            "store_context",
            &key,
            self.backend.set(&key, &encode(&record)?, Some(ttl)).await,
        )?;
        debug!(context_id = %context_id, ttl_secs = ttl.as_secs(), "Stored context");
        Ok(())
    }

    pub async fn get_context(&self, context_id: &str) -> StorageResult<Option<ContextRecord>> {
        let key = self.keys.context(context_id);
        self.get_record("get_context", &key).await
    }

    // ========== Decisions ==========

    /// Record a decision and index it under the agent.
    ///
    /// The index is trimmed to `decision_index_limit` ids and also loses any
    /// id older than the content TTL, so it never outlives its content.
    pub async fn store_decision(&self, agent_id: &str, data: Value) -> StorageResult<DecisionId> {
        let stamp = next_stamp();
        let decision_id = DecisionId::derive(agent_id, &stamp);
        let record = DecisionRecord {
            timestamp: stamp,
            agent_id: agent_id.to_string(),
            decision_id: decision_id.clone(),
            data,
        };

        let index = self.keys.decision_index(agent_id);
        let score = score_of(&stamp);
        let batch = KvBatch::new()
            .set_ex(
                self.keys.decision(decision_id.as_str()),
                encode(&record)?,
                self.policy.decision_ttl,
            )
            .zadd(&index, decision_id.as_str(), score)
            .ztrim_newest(&index, self.policy.decision_index_limit)
            .zdrop_older_than(&index, expiry_cutoff(score, self.policy.decision_ttl));
        logged("store_decision", &index, self.backend.apply(batch).await)?;

        debug!(agent_id = %agent_id, decision_id = %decision_id, "Stored decision");
        Ok(decision_id)
    }

    /// Most recent decisions, newest first. Ids whose content already
    /// expired are skipped.
    pub async fn get_recent_decisions(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<DecisionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let index = self.keys.decision_index(agent_id);
        let ids = logged(
            "get_recent_decisions",
            &index,
            self.backend
                .zrange(&index, 0, last_rank(limit), RangeOrder::Descending)
                .await,
        )?;

        let mut decisions = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.keys.decision(&id);
            match self.get_record::<DecisionRecord>("get_recent_decisions", &key).await {
                Ok(Some(decision)) => decisions.push(decision),
                Ok(None) => debug!(decision_id = %id, "Decision content expired"),
                Err(e) if !e.is_connectivity() => obs::emit_entry_skipped(&key, &e),
                Err(e) => return Err(e),
            }
        }

        debug!(agent_id = %agent_id, count = decisions.len(), "Retrieved recent decisions");
        Ok(decisions)
    }

    // ========== Knowledge ==========

    /// Store a knowledge entry and add it to its category's id set.
    ///
    /// The category [`RESERVED_CATEGORY`] is rejected: its entry keys would
    /// land on the id sets of other categories.
    pub async fn store_knowledge(
        &self,
        knowledge_id: &str,
        data: Value,
        category: &str,
    ) -> StorageResult<()> {
        if category == RESERVED_CATEGORY {
            return Err(StorageError::InvalidInput(format!(
                "knowledge category `{RESERVED_CATEGORY}` is reserved"
            )));
        }
        let key = self.keys.knowledge(category, knowledge_id);
        let record = KnowledgeRecord {
            timestamp: next_stamp(),
            knowledge_id: knowledge_id.to_string(),
            category: category.to_string(),
            data,
        };

        let batch = KvBatch::new()
            .set(&key, encode(&record)?)
            .sadd(self.keys.knowledge_index(category), knowledge_id);
        logged("store_knowledge", &key, self.backend.apply(batch).await)?;

        debug!(knowledge_id = %knowledge_id, category = %category, "Stored knowledge");
        Ok(())
    }

    pub async fn get_knowledge(
        &self,
        knowledge_id: &str,
        category: &str,
    ) -> StorageResult<Option<KnowledgeRecord>> {
        if category == RESERVED_CATEGORY {
            return Ok(None);
        }
        let key = self.keys.knowledge(category, knowledge_id);
        self.get_record("get_knowledge", &key).await
    }

    /// Up to `limit` entries of a category, sampled in arbitrary order.
    pub async fn get_knowledge_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> StorageResult<Vec<KnowledgeRecord>> {
        let index = self.keys.knowledge_index(category);
        let ids = logged(
            "get_knowledge_by_category",
            &index,
            self.backend.srandmember(&index, limit).await,
        )?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.keys.knowledge(category, &id);
            match self.get_record::<KnowledgeRecord>("get_knowledge_by_category", &key).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) if !e.is_connectivity() => obs::emit_entry_skipped(&key, &e),
                Err(e) => return Err(e),
            }
        }

        debug!(category = %category, count = items.len(), "Retrieved knowledge items");
        Ok(items)
    }

    // ========== Agent state ==========

    pub async fn store_agent_state(&self, agent_id: &str, state: Value) -> StorageResult<()> {
        let key = self.keys.agent_state(agent_id);
        let record = AgentStateRecord {
            timestamp: next_stamp(),
            agent_id: agent_id.to_string(),
            state,
        };

        logged(
            "store_agent_state",
            &key,
            self.backend.set(&key, &encode(&record)?, None).await,
        )?;
        debug!(agent_id = %agent_id, "Stored agent state");
        Ok(())
    }

    pub async fn get_agent_state(&self, agent_id: &str) -> StorageResult<Option<AgentStateRecord>> {
        let key = self.keys.agent_state(agent_id);
        self.get_record("get_agent_state", &key).await
    }

    // ========== Maintenance ==========

    /// Delete an agent's conversations, decision index, every decision the
    /// index references, and its state.
    ///
    /// Returns `true` when at least one key was removed.
    pub async fn clear_agent_memory(&self, agent_id: &str) -> StorageResult<bool> {
        let index = self.keys.decision_index(agent_id);
        let decision_ids = logged(
            "clear_agent_memory",
            &index,
            self.backend.zrange(&index, 0, -1, RangeOrder::Ascending).await,
        )?;

        let mut keys = vec![
            self.keys.conversation(agent_id),
            index.clone(),
            self.keys.agent_state(agent_id),
        ];
        keys.extend(decision_ids.iter().map(|id| self.keys.decision(id)));

        let deleted = logged("clear_agent_memory", &index, self.backend.delete(&keys).await)?;
        obs::emit_memory_cleared(agent_id, deleted);
        Ok(deleted > 0)
    }

    /// Key counts per record family. Scans every key in the namespace.
    pub async fn get_memory_stats(&self) -> StorageResult<MemoryStats> {
        let pattern = self.keys.all_pattern();
        let total_keys = logged("get_memory_stats", &pattern, self.backend.dbsize().await)?;
        let keys = logged("get_memory_stats", &pattern, self.backend.keys(&pattern).await)?;

        let mut key_counts: BTreeMap<String, u64> = KeyPrefix::ALL
            .iter()
            .map(|prefix| (prefix.label().to_string(), 0))
            .collect();
        for key in &keys {
            if let Some(prefix) = self.keys.classify(key) {
                *key_counts.entry(prefix.label().to_string()).or_default() += 1;
            }
        }

        debug!(total_keys, namespace_keys = keys.len(), "Retrieved memory statistics");
        Ok(MemoryStats {
            total_keys,
            namespace_keys: keys.len() as u64,
            key_counts,
            timestamp: Utc::now(),
        })
    }

    /// Write/read/delete a disposable key. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        health::probe(self.backend.as_ref(), &self.keys.health_probe()).await
    }

    async fn get_record<T: DeserializeOwned>(
        &self,
        op: &'static str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let raw = logged(op, key, self.backend.get(key).await)?;
        raw.map(|raw| logged(op, key, decode::<T>(&raw))).transpose()
    }
}
