//! Record definitions for the recall store
//!
//! Records:
//! - ConversationRecord: one turn in an agent's conversation history
//! - ContextRecord: transient, caller-addressed cache entry
//! - DecisionRecord: one entry in an agent's decision log
//! - KnowledgeRecord: categorised knowledge base entry
//! - AgentStateRecord: live snapshot of an agent, overwritten in place
//! - CheckpointRecord: immutable snapshot of a thread's execution state
//!
//! Payloads stay opaque JSON; the envelope around them is typed so a
//! malformed record fails to decode instead of surfacing half-read.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time, strictly later than any stamp handed out before in this
/// process. Sorted collections are scored by it, so two inserts in the same
/// microsecond still keep their insertion order.
pub fn next_stamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let prev = LAST_STAMP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    let micros = now.max(prev + 1);
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}

/// Sorted-collection score for a stamp: epoch seconds with µs precision.
pub fn score_of(stamp: &DateTime<Utc>) -> f64 {
    stamp.timestamp_micros() as f64 / 1_000_000.0
}

fn short_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

fn rfc3339(stamp: &DateTime<Utc>) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp: RFC 3339, or ISO 8601 without an offset
/// (read as UTC).
pub fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

/// Serde adaptor for record timestamps written by any producer.
///
/// Serializes like `DateTime<Utc>`; deserializes through [`parse_stamp`].
pub(crate) mod lenient_stamp {
    use super::*;
    use serde::de::Error;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(stamp: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        stamp.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_stamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Identifier of a decision, derived from the agent and the decision time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub String);

impl DecisionId {
    pub fn derive(agent_id: &str, stamp: &DateTime<Utc>) -> Self {
        DecisionId(short_sha256(&format!("{agent_id}_{}", rfc3339(stamp))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a checkpoint: hash of thread, time and a random salt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    pub fn generate(thread_id: &str, stamp: &DateTime<Utc>) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        CheckpointId(short_sha256(&format!(
            "{thread_id}_{}_{salt}",
            rfc3339(stamp)
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CheckpointId {
    fn from(s: &str) -> Self {
        CheckpointId(s.to_string())
    }
}

/// One conversation turn stored for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub data: Value,
}

impl ConversationRecord {
    pub fn new(agent_id: impl Into<String>, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            agent_id: agent_id.into(),
            data,
        }
    }
}

/// Transient context entry, addressed by caller-supplied id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
    pub context_id: String,
    pub data: Value,
}

/// One decision in an agent's decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub decision_id: DecisionId,
    pub data: Value,
}

/// Knowledge base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
    pub knowledge_id: String,
    pub category: String,
    pub data: Value,
}

/// Live agent state, overwritten on every store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateRecord {
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub state: Value,
}

/// Snapshot of a thread's execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub thread_id: String,
    pub checkpoint_id: CheckpointId,
    pub data: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(with = "lenient_stamp")]
    pub timestamp: DateTime<Utc>,
}

/// Checkpoint reshaped for a resuming executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoredCheckpoint {
    pub state: Value,
    pub metadata: Value,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub checkpoint_id: CheckpointId,
}

impl From<CheckpointRecord> for RestoredCheckpoint {
    fn from(record: CheckpointRecord) -> Self {
        Self {
            state: record.data,
            metadata: record.metadata,
            thread_id: record.thread_id,
            timestamp: record.timestamp,
            checkpoint_id: record.checkpoint_id,
        }
    }
}

/// Summary of one thread's checkpoint chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStatistics {
    pub thread_id: String,
    pub checkpoint_count: u64,
    pub first_checkpoint: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Encode a record for storage.
pub fn encode<T: Serialize>(record: &T) -> StorageResult<String> {
    serde_json::to_string(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Decode a stored record.
pub fn decode<T: for<'de> Deserialize<'de>>(raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamps_strictly_increase() {
        let mut last = next_stamp();
        for _ in 0..1000 {
            let next = next_stamp();
            assert!(next > last);
            assert!(score_of(&next) > score_of(&last));
            last = next;
        }
    }

    #[test]
    fn test_decision_id_is_deterministic() {
        let stamp = next_stamp();
        let a = DecisionId::derive("agent-1", &stamp);
        let b = DecisionId::derive("agent-1", &stamp);
        let c = DecisionId::derive("agent-2", &stamp);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_checkpoint_ids_are_salted() {
        let stamp = next_stamp();
        let a = CheckpointId::generate("thread-1", &stamp);
        let b = CheckpointId::generate("thread-1", &stamp);
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_conversation_record_json_shape() {
        let record = ConversationRecord::new("agent-1", json!({"msg": "hi"}), next_stamp());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["agent_id"], "agent-1");
        assert_eq!(value["data"]["msg"], "hi");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_checkpoint_metadata_defaults_to_null() {
        let raw = json!({
            "thread_id": "t",
            "checkpoint_id": "abc",
            "data": {"step": 1},
            "timestamp": "2026-01-01T00:00:00Z"
        })
        .to_string();
        let record: CheckpointRecord = decode(&raw).unwrap();
        assert_eq!(record.metadata, Value::Null);
        assert_eq!(record.checkpoint_id.as_str(), "abc");
    }

    #[test]
    fn test_offsetless_timestamps_read_as_utc() {
        let raw = json!({
            "timestamp": "2025-01-02T03:04:05.123456",
            "agent_id": "a",
            "data": {"msg": "hi"}
        })
        .to_string();
        let record: ConversationRecord = decode(&raw).unwrap();
        assert_eq!(record.timestamp.to_rfc3339(), "2025-01-02T03:04:05.123456+00:00");

        assert_eq!(
            parse_stamp("2025-01-02T03:04:05+02:00"),
            parse_stamp("2025-01-02T01:04:05")
        );
        assert!(parse_stamp("yesterday").is_none());
        assert!(decode::<ConversationRecord>(&raw.replace("2025-01-02T", "x")).is_err());
    }

    #[test]
    fn test_decode_reports_malformed_payload() {
        let err = decode::<ContextRecord>("{not json").unwrap_err();
        assert!(matches!(err, StorageError::Deserialization(_)));
    }

    #[test]
    fn test_restored_checkpoint_from_record() {
        let record = CheckpointRecord {
            thread_id: "t".into(),
            checkpoint_id: CheckpointId::from("abc"),
            data: json!({"step": 2}),
            metadata: json!({"node": "plan"}),
            timestamp: next_stamp(),
        };
        let restored = RestoredCheckpoint::from(record.clone());
        assert_eq!(restored.state, record.data);
        assert_eq!(restored.metadata["node"], "plan");
        assert_eq!(restored.checkpoint_id, record.checkpoint_id);
    }
}
