//! Recall-State: Redis-backed memory for autonomous agents
//!
//! This crate gives long-running agents durable, bounded recall: a rolling
//! conversation history, short-lived context, a decision log, a categorised
//! knowledge base, a live state snapshot, and resumable checkpoint chains
//! for graph executors.
//!
//! ## Key Components
//!
//! - `KvBackend`: capability trait the stores are written against
//! - `RedisHandle`: Redis implementation over a multiplexed connection
//! - `MemoryStore`: conversations, context, decisions, knowledge, state
//! - `CheckpointManager`: per-thread checkpoint chains
//! - `AgentStateManager`: checkpoints that carry conversation memory along
//! - `fakes::MemoryKvBackend`: in-process backend for tests
//!
//! Every operation returns [`StorageResult`]; a missing record is
//! `Ok(None)`, an unreachable backend is [`StorageError::Connection`].

mod agent_state;
mod chat_buffer;
mod checkpoint;
mod error;
pub mod fakes;
mod handle;
mod health;
pub mod keys;
mod memory_store;
pub mod obs;
pub mod retention;
mod schema;
mod search;
pub mod storage_traits;
pub mod telemetry;

pub use agent_state::{
    AgentStateBundle, AgentStateManager, BundleContext, MemoryContext, RestoredAgentState,
    DEFAULT_AGENT_ID,
};
pub use chat_buffer::{ConversationBuffer, MEMORY_KEY};
pub use checkpoint::{CheckpointHealth, CheckpointManager, HEALTH_CHECK_THREAD};
pub use error::StorageError;
pub use handle::{BackendConfig, RedisHandle};
pub use health::{probe, HealthReport, HealthStatus};
pub use keys::{KeyPrefix, KeySpace};
pub use memory_store::{MemoryStats, MemoryStore, DEFAULT_KNOWLEDGE_CATEGORY};
pub use retention::{RetentionPolicy, DEFAULT_CONTEXT_TTL};
pub use schema::{
    AgentStateRecord, CheckpointId, CheckpointRecord, ContextRecord, ConversationRecord,
    DecisionId, DecisionRecord, KnowledgeRecord, RestoredCheckpoint, ThreadStatistics,
};
pub use search::{MemoryRecord, Relevance, SearchHit};
pub use storage_traits::{KvBackend, KvBatch, KvOp, RangeOrder, StorageResult};
