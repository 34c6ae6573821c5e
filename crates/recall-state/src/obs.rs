//! Structured lifecycle events for memory and checkpoint operations.
//!
//! One function per lifecycle event, each logged with a stable `event`
//! field so log pipelines can filter on it.

use tracing::{info, warn};

pub fn emit_checkpoint_saved(thread_id: &str, checkpoint_id: &str, has_metadata: bool) {
    info!(
        event = "checkpoint.saved",
        thread_id = %thread_id,
        checkpoint_id = %checkpoint_id,
        has_metadata = has_metadata,
    );
}

pub fn emit_checkpoint_restored(thread_id: &str, checkpoint_id: &str) {
    info!(
        event = "checkpoint.restored",
        thread_id = %thread_id,
        checkpoint_id = %checkpoint_id,
    );
}

pub fn emit_thread_cleared(thread_id: &str, deleted: usize) {
    info!(event = "thread.cleared", thread_id = %thread_id, deleted = deleted);
}

pub fn emit_memory_cleared(agent_id: &str, deleted: u64) {
    info!(event = "memory.cleared", agent_id = %agent_id, deleted = deleted);
}

pub fn emit_health_probed(healthy: bool, connected: bool) {
    if healthy {
        info!(event = "health.probed", healthy = healthy, connected = connected);
    } else {
        warn!(event = "health.probed", healthy = healthy, connected = connected);
    }
}

/// Malformed stored entry skipped during a multi-record read.
pub fn emit_entry_skipped(key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "entry.skipped", key = %key, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscriber() {
        emit_checkpoint_saved("thread-under-test", "abc", false);
        emit_entry_skipped("conv:a", &"expected value at line 1");
    }
}
