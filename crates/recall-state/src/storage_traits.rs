//! Storage trait definitions for the recall store
//!
//! `KvBackend` is the capability interface every component is written
//! against: plain keys with optional TTL, score-ordered collections,
//! membership sets, and an ordered atomic write batch.
//!
//! Implementations:
//! - [`crate::RedisHandle`]: Redis-compatible service over TCP
//! - [`crate::fakes::MemoryKvBackend`]: in-process fake for tests

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Direction of a range query over a sorted collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    /// Lowest score first (`ZRANGE`)
    Ascending,
    /// Highest score first (`ZREVRANGE`)
    Descending,
}

/// A single write inside a [`KvBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum KvOp {
    /// Set a string value, optionally expiring after `ttl`.
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// (Re)set the expiration of an existing key.
    Expire { key: String, ttl: Duration },
    /// Add or re-score a member of a sorted collection.
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// Remove members by rank (inclusive, negative ranks count from the end).
    ZRemRangeByRank { key: String, start: isize, stop: isize },
    /// Remove members whose score is strictly below `max_exclusive`.
    ZRemRangeByScore { key: String, max_exclusive: f64 },
    /// Add a member to an unordered set.
    SAdd { key: String, member: String },
    /// Delete a key of any type.
    Delete { key: String },
}

/// Ordered list of writes applied as one unit.
///
/// Backends that support transactions (Redis `MULTI`/`EXEC`) apply the
/// whole batch atomically; the ops always run in insertion order. An op
/// that fails at run time (for example on a key of the wrong type) is not
/// rolled back: the other ops still apply and the first error is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(KvOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(KvOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(KvOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(KvOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    /// Keep only the `keep` highest-scored members of a sorted collection.
    pub fn ztrim_newest(mut self, key: impl Into<String>, keep: usize) -> Self {
        let stop = -(keep as isize) - 1;
        self.ops.push(KvOp::ZRemRangeByRank {
            key: key.into(),
            start: 0,
            stop,
        });
        self
    }

    /// Drop members scored before `cutoff` (epoch seconds).
    pub fn zdrop_older_than(mut self, key: impl Into<String>, cutoff: f64) -> Self {
        self.ops.push(KvOp::ZRemRangeByScore {
            key: key.into(),
            max_exclusive: cutoff,
        });
        self
    }

    pub fn sadd(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(KvOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[KvOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<KvOp> {
        self.ops
    }
}

/// Ordered key-value backend with per-key expiration.
///
/// Guarantees expected from every implementation:
/// - Each individual call is atomic per key.
/// - `apply` runs its ops in order; the Redis implementation wraps them in
///   a transaction.
/// - Expired keys are never returned by reads.
/// - Reading a missing key is `Ok(None)` / `Ok(vec![])`, never an error.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Round-trip check of the connection.
    async fn ping(&self) -> StorageResult<()>;

    /// Read a string value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a string value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StorageResult<()>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StorageResult<u64>;

    /// Check whether a key exists (and has not expired).
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Members of a sorted collection between ranks `start..=stop`
    /// (negative ranks count from the end) in the given order.
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> StorageResult<Vec<String>>;

    /// Cardinality of a sorted collection.
    async fn zcard(&self, key: &str) -> StorageResult<u64>;

    /// Up to `count` distinct members of a set, in arbitrary order.
    async fn srandmember(&self, key: &str, count: usize) -> StorageResult<Vec<String>>;

    /// Keys matching a glob pattern (`*` and `?`). Full scan.
    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>>;

    /// Number of keys in the selected database.
    async fn dbsize(&self) -> StorageResult<u64>;

    /// Apply an ordered batch of writes.
    async fn apply(&self, batch: KvBatch) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ztrim_newest_rank_bounds() {
        let batch = KvBatch::new().ztrim_newest("conv:a", 1000);
        assert_eq!(
            batch.ops(),
            &[KvOp::ZRemRangeByRank {
                key: "conv:a".into(),
                start: 0,
                stop: -1001,
            }]
        );
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = KvBatch::new()
            .set_ex("decision:x", "{}", Duration::from_secs(7))
            .zadd("decision:index:a", "x", 1.0)
            .ztrim_newest("decision:index:a", 500);

        let ops = batch.into_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], KvOp::Set { .. }));
        assert!(matches!(ops[1], KvOp::ZAdd { .. }));
        assert!(matches!(ops[2], KvOp::ZRemRangeByRank { .. }));
    }

    #[test]
    fn test_empty_batch() {
        assert!(KvBatch::new().is_empty());
        assert!(!KvBatch::new().delete("k").is_empty());
    }
}
