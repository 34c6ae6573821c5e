//! Checkpoint chains for resumable graph executors
//!
//! A checkpoint is an immutable JSON snapshot of a thread's execution state.
//! Each thread keeps a score-ordered index of its checkpoint ids, capped at
//! `checkpoint_limit` and never pointing further back than the content TTL.
//! Metadata is duplicated into a side key so it can be read without loading
//! the full state.
//!
//! `delete_checkpoint` only knows the checkpoint id, so it leaves the id in
//! its thread index. Reads skip such dangling ids and trims age them out.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::health::{self, HealthReport, HealthStatus};
use crate::keys::{KeyPrefix, KeySpace};
use crate::memory_store::{last_rank, logged, MemoryStore};
use crate::obs;
use crate::retention::{expiry_cutoff, RetentionPolicy};
use crate::schema::{
    decode, encode, next_stamp, score_of, CheckpointId, CheckpointRecord, RestoredCheckpoint,
    ThreadStatistics,
};
use crate::search::matches_query;
use crate::storage_traits::{KvBackend, KvBatch, RangeOrder, StorageResult};

/// Thread used by the checkpoint self-test.
pub const HEALTH_CHECK_THREAD: &str = "health_check_test";

const RESULT_SUMMARY_CHARS: usize = 500;

/// Backend probe plus a save/load cycle through the checkpoint path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHealth {
    pub backend: HealthReport,
    pub checkpoint_operations: bool,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

/// Checkpoint persistence over a [`KvBackend`]
#[derive(Clone)]
pub struct CheckpointManager {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    policy: RetentionPolicy,
}

impl CheckpointManager {
    pub fn new(backend: Arc<dyn KvBackend>, keys: KeySpace) -> Self {
        Self {
            backend,
            keys,
            policy: RetentionPolicy::default(),
        }
    }

    /// Share a memory store's backend, namespace and retention policy.
    pub fn from_store(store: &MemoryStore) -> Self {
        Self {
            backend: store.backend().clone(),
            keys: store.keys().clone(),
            policy: store.policy().clone(),
        }
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Save a snapshot and append it to the thread's index.
    #[instrument(skip(self, state, metadata))]
    pub async fn save_checkpoint(
        &self,
        thread_id: &str,
        state: Value,
        metadata: Option<Value>,
    ) -> StorageResult<CheckpointId> {
        let stamp = next_stamp();
        let checkpoint_id = CheckpointId::generate(thread_id, &stamp);
        let has_metadata = metadata.is_some();
        let record = CheckpointRecord {
            thread_id: thread_id.to_string(),
            checkpoint_id: checkpoint_id.clone(),
            data: state,
            metadata: metadata.unwrap_or_else(|| json!({})),
            timestamp: stamp,
        };

        let ttl = self.policy.checkpoint_ttl;
        let thread_key = self.keys.thread(thread_id);
        let score = score_of(&stamp);
        let mut batch = KvBatch::new()
            .set_ex(
                self.keys.checkpoint(checkpoint_id.as_str()),
                encode(&record)?,
                ttl,
            )
            .zadd(&thread_key, checkpoint_id.as_str(), score)
            .ztrim_newest(&thread_key, self.policy.checkpoint_limit)
            .zdrop_older_than(&thread_key, expiry_cutoff(score, ttl));
        if has_metadata {
            batch = batch.set_ex(
                self.keys.metadata(checkpoint_id.as_str()),
                encode(&record.metadata)?,
                ttl,
            );
        }
        logged("save_checkpoint", &thread_key, self.backend.apply(batch).await)?;

        obs::emit_checkpoint_saved(thread_id, checkpoint_id.as_str(), has_metadata);
        Ok(checkpoint_id)
    }

    pub async fn load_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> StorageResult<Option<CheckpointRecord>> {
        let key = self.keys.checkpoint(checkpoint_id);
        let raw = logged("load_checkpoint", &key, self.backend.get(&key).await)?;
        let record = raw
            .map(|raw| logged("load_checkpoint", &key, decode::<CheckpointRecord>(&raw)))
            .transpose()?;
        debug!(checkpoint_id = %checkpoint_id, found = record.is_some(), "Loaded checkpoint");
        Ok(record)
    }

    /// Highest-scored checkpoint of the thread.
    pub async fn get_latest_checkpoint(
        &self,
        thread_id: &str,
    ) -> StorageResult<Option<CheckpointRecord>> {
        let ids = self.thread_ids(thread_id, 0, 0, RangeOrder::Descending).await?;
        match ids.first() {
            Some(id) => self.load_checkpoint(id).await,
            None => Ok(None),
        }
    }

    /// Newest first. Ids whose content is gone are skipped.
    #[instrument(skip(self))]
    pub async fn list_checkpoints(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<CheckpointRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .thread_ids(thread_id, 0, last_rank(limit), RangeOrder::Descending)
            .await?;

        let mut checkpoints = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_checkpoint(&id).await {
                Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                Ok(None) => debug!(checkpoint_id = %id, "Dangling checkpoint id in thread index"),
                Err(e) if !e.is_connectivity() => {
                    obs::emit_entry_skipped(&self.keys.checkpoint(&id), &e)
                }
                Err(e) => return Err(e),
            }
        }

        debug!(count = checkpoints.len(), "Listed checkpoints");
        Ok(checkpoints)
    }

    /// Load a checkpoint reshaped for a resuming executor.
    pub async fn restore_from_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> StorageResult<Option<RestoredCheckpoint>> {
        let Some(record) = self.load_checkpoint(checkpoint_id).await? else {
            return Ok(None);
        };
        obs::emit_checkpoint_restored(&record.thread_id, checkpoint_id);
        Ok(Some(RestoredCheckpoint::from(record)))
    }

    /// Remove a checkpoint's content and metadata keys.
    ///
    /// Returns `true` if either key existed. The thread index is untouched.
    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> StorageResult<bool> {
        let keys = [
            self.keys.checkpoint(checkpoint_id),
            self.keys.metadata(checkpoint_id),
        ];
        let deleted = logged("delete_checkpoint", &keys[0], self.backend.delete(&keys).await)?;
        debug!(checkpoint_id = %checkpoint_id, deleted, "Deleted checkpoint");
        Ok(deleted > 0)
    }

    /// Delete every checkpoint in the thread's index, then the index.
    ///
    /// Returns how many checkpoints actually had something to delete.
    #[instrument(skip(self))]
    pub async fn clear_thread_checkpoints(&self, thread_id: &str) -> StorageResult<usize> {
        let ids = self.thread_ids(thread_id, 0, -1, RangeOrder::Ascending).await?;

        let mut deleted = 0;
        for id in &ids {
            if self.delete_checkpoint(id).await? {
                deleted += 1;
            }
        }
        let thread_key = self.keys.thread(thread_id);
        logged(
            "clear_thread_checkpoints",
            &thread_key,
            self.backend.delete(&[thread_key.clone()]).await,
        )?;

        obs::emit_thread_cleared(thread_id, deleted);
        Ok(deleted)
    }

    /// Count plus oldest/newest timestamps of the thread's chain.
    pub async fn get_thread_statistics(&self, thread_id: &str) -> StorageResult<ThreadStatistics> {
        let thread_key = self.keys.thread(thread_id);
        let checkpoint_count = logged(
            "get_thread_statistics",
            &thread_key,
            self.backend.zcard(&thread_key).await,
        )?;

        let (mut first_checkpoint, mut last_checkpoint) = (None, None);
        if checkpoint_count > 0 {
            first_checkpoint = self.edge_timestamp(thread_id, RangeOrder::Ascending).await?;
            last_checkpoint = self.edge_timestamp(thread_id, RangeOrder::Descending).await?;
        }

        Ok(ThreadStatistics {
            thread_id: thread_id.to_string(),
            checkpoint_count,
            first_checkpoint,
            last_checkpoint,
            timestamp: Utc::now(),
        })
    }

    /// Case-insensitive substring match over serialized checkpoints.
    ///
    /// Linear scan: looks at no more than `limit * 2` checkpoint keys and
    /// stops after `limit` hits.
    pub async fn search_checkpoints(
        &self,
        query: &str,
        limit: usize,
    ) -> StorageResult<Vec<CheckpointRecord>> {
        let pattern = self.keys.pattern(KeyPrefix::Checkpoint);
        let keys = logged("search_checkpoints", &pattern, self.backend.keys(&pattern).await)?;
        let needle = query.to_lowercase();

        let mut hits = Vec::new();
        for key in keys.iter().take(limit.saturating_mul(2)) {
            if hits.len() >= limit {
                break;
            }
            let raw = match self.backend.get(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    obs::emit_entry_skipped(key, &e);
                    continue;
                }
            };
            match decode::<CheckpointRecord>(&raw) {
                Ok(record) if matches_query(&record, &needle) => hits.push(record),
                Ok(_) => {}
                Err(e) => obs::emit_entry_skipped(key, &e),
            }
        }

        debug!(query = %query, count = hits.len(), "Searched checkpoints");
        Ok(hits)
    }

    /// Run `task` and checkpoint its outcome on `thread_id`.
    ///
    /// Success saves `{function, result, timestamp}` with metadata
    /// `{function, auto_checkpoint: true}`; failure saves
    /// `{function, error, timestamp}` with metadata `{function, error: true}`.
    /// `result` is the first 500 characters of the output's JSON. The task's
    /// own outcome is always returned; a failed save is only logged.
    pub async fn checkpointed<F, T, E>(
        &self,
        thread_id: &str,
        function: &str,
        task: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let outcome = task.await;
        let (state, metadata) = match &outcome {
            Ok(output) => {
                let result = serde_json::to_string(output)
                    .unwrap_or_else(|e| format!("<unserializable: {e}>"));
                (
                    json!({
                        "function": function,
                        "result": result.chars().take(RESULT_SUMMARY_CHARS).collect::<String>(),
                        "timestamp": Utc::now(),
                    }),
                    json!({"function": function, "auto_checkpoint": true}),
                )
            }
            Err(e) => (
                json!({
                    "function": function,
                    "error": e.to_string(),
                    "timestamp": Utc::now(),
                }),
                json!({"function": function, "error": true}),
            ),
        };

        match self.save_checkpoint(thread_id, state, Some(metadata)).await {
            Ok(id) => debug!(
                function,
                checkpoint_id = %id,
                failed = outcome.is_err(),
                "Auto-checkpointed"
            ),
            Err(e) => warn!(function, error = %e, "Auto-checkpoint not saved"),
        }
        outcome
    }

    /// Metadata from the side key, falling back to the full checkpoint.
    pub async fn get_checkpoint_metadata(&self, checkpoint_id: &str) -> StorageResult<Option<Value>> {
        let key = self.keys.metadata(checkpoint_id);
        if let Some(raw) = logged("get_checkpoint_metadata", &key, self.backend.get(&key).await)? {
            return logged("get_checkpoint_metadata", &key, decode::<Value>(&raw)).map(Some);
        }
        Ok(self
            .load_checkpoint(checkpoint_id)
            .await?
            .map(|record| record.metadata))
    }

    /// Backend probe plus a save/load/clear cycle on a throwaway thread.
    /// Never fails.
    pub async fn health_check(&self) -> CheckpointHealth {
        let backend = health::probe(self.backend.as_ref(), &self.keys.health_probe()).await;
        let checkpoint_operations = self.self_test().await.unwrap_or_else(|e| {
            debug!(error = %e, "Checkpoint self-test failed");
            false
        });

        CheckpointHealth {
            backend,
            checkpoint_operations,
            status: if checkpoint_operations {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            timestamp: Utc::now(),
        }
    }

    async fn self_test(&self) -> StorageResult<bool> {
        let state = json!({
            "state": {"test": true},
            "step": 1,
            "timestamp": Utc::now(),
        });
        let metadata = json!({"test": true, "health_check": true});

        let checkpoint_id = self
            .save_checkpoint(HEALTH_CHECK_THREAD, state, Some(metadata))
            .await?;
        let loaded = self.load_checkpoint(checkpoint_id.as_str()).await?.is_some();
        self.delete_checkpoint(checkpoint_id.as_str()).await?;
        self.clear_thread_checkpoints(HEALTH_CHECK_THREAD).await?;
        Ok(loaded)
    }

    async fn thread_ids(
        &self,
        thread_id: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> StorageResult<Vec<String>> {
        let thread_key = self.keys.thread(thread_id);
        logged(
            "thread_index",
            &thread_key,
            self.backend.zrange(&thread_key, start, stop, order).await,
        )
    }

    async fn edge_timestamp(
        &self,
        thread_id: &str,
        order: RangeOrder,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let ids = self.thread_ids(thread_id, 0, 0, order).await?;
        let Some(id) = ids.first() else {
            return Ok(None);
        };
        Ok(self.load_checkpoint(id).await?.map(|record| record.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryKvBackend;

    fn manager() -> (Arc<MemoryKvBackend>, CheckpointManager) {
        let kv = Arc::new(MemoryKvBackend::new());
        let manager = CheckpointManager::new(kv.clone(), KeySpace::new(None));
        (kv, manager)
    }

    #[tokio::test]
    async fn test_metadata_side_key_only_when_given() {
        let (kv, manager) = manager();
        let without = manager.save_checkpoint("t", json!({"s": 1}), None).await.unwrap();
        let with = manager
            .save_checkpoint("t", json!({"s": 2}), Some(json!({"node": "plan"})))
            .await
            .unwrap();

        assert!(!kv.exists(&format!("metadata:{without}")).await.unwrap());
        assert!(kv.exists(&format!("metadata:{with}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_metadata_defaults_to_empty_object() {
        let (_, manager) = manager();
        let id = manager.save_checkpoint("t", json!({"s": 1}), None).await.unwrap();
        let record = manager.load_checkpoint(id.as_str()).await.unwrap().unwrap();
        assert_eq!(record.metadata, json!({}));
    }

    #[tokio::test]
    async fn test_health_check_leaves_nothing_behind() {
        let (kv, manager) = manager();
        let health = manager.health_check().await;

        assert!(health.checkpoint_operations);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.backend.is_healthy());
        assert!(kv.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpointed_result_is_summarised() {
        let (_, manager) = manager();
        let out: Result<String, String> = manager
            .checkpointed("t", "long", async { Ok("x".repeat(900)) })
            .await;
        assert_eq!(out.unwrap().len(), 900);

        let saved = manager.get_latest_checkpoint("t").await.unwrap().unwrap();
        assert_eq!(saved.data["result"].as_str().unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn test_checkpointed_returns_outcome_when_backend_is_down() {
        let (kv, manager) = manager();
        kv.set_online(false);
        let out: Result<u32, String> = manager.checkpointed("t", "f", async { Ok(7) }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_health_check_offline() {
        let (kv, manager) = manager();
        kv.set_online(false);
        let health = manager.health_check().await;

        assert!(!health.checkpoint_operations);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.backend.connected);
    }
}
