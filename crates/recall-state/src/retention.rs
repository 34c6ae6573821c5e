//! Retention bounds and expirations applied on every write.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Default TTL for context entries when the caller has no preference.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(3600);

/// Policy controlling how much history survives and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Conversation entries kept per agent (newest win).
    pub conversation_limit: usize,
    /// Expiration of a whole conversation collection, refreshed on insert.
    pub conversation_ttl: Duration,
    /// Decision ids kept in an agent's index.
    pub decision_index_limit: usize,
    /// Expiration of each decision's content.
    pub decision_ttl: Duration,
    /// Checkpoint ids kept in a thread's index.
    pub checkpoint_limit: usize,
    /// Expiration of checkpoint content and metadata.
    pub checkpoint_ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            conversation_limit: 1000,
            conversation_ttl: DAY * 30,
            decision_index_limit: 500,
            decision_ttl: DAY * 7,
            checkpoint_limit: 50,
            checkpoint_ttl: DAY,
        }
    }
}

/// Score below which an index entry's content has already expired.
///
/// Index trims drop everything older than this, so an index never keeps
/// pointing at content past its TTL.
pub fn expiry_cutoff(now_score: f64, ttl: Duration) -> f64 {
    now_score - ttl.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.conversation_limit, 1000);
        assert_eq!(policy.conversation_ttl, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(policy.decision_index_limit, 500);
        assert_eq!(policy.decision_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(policy.checkpoint_limit, 50);
        assert_eq!(policy.checkpoint_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(DEFAULT_CONTEXT_TTL, Duration::from_secs(3600));
    }

    #[test]
    fn test_expiry_cutoff() {
        let cutoff = expiry_cutoff(1_000_000.0, Duration::from_secs(3600));
        assert_eq!(cutoff, 996_400.0);
    }
}
