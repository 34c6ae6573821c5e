//! Synthetic read/write/delete self-test against the backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::StorageError;
use crate::obs;
use crate::storage_traits::{KvBackend, StorageResult};

const PROBE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one probe cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Backend answered at all
    pub connected: bool,
    /// Value read back equals the value written
    pub read_write_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Report for a backend that could not be reached or used.
    pub fn unreachable(error: &StorageError) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            connected: false,
            read_write_ok: false,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

async fn round_trip(backend: &dyn KvBackend, key: &str, value: &str) -> StorageResult<bool> {
    backend.set(key, value, Some(PROBE_TTL)).await?;
    let read = backend.get(key).await?;
    backend.delete(&[key.to_string()]).await?;
    Ok(read.as_deref() == Some(value))
}

/// Write a disposable key, read it back, delete it.
///
/// Never fails: backend errors become an unhealthy, disconnected report.
pub async fn probe(backend: &dyn KvBackend, key: &str) -> HealthReport {
    let timestamp = Utc::now();
    let value = json!({ "timestamp": timestamp }).to_string();

    let report = match round_trip(backend, key, &value).await {
        Ok(read_write_ok) => HealthReport {
            status: if read_write_ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            connected: true,
            read_write_ok,
            error: None,
            timestamp,
        },
        Err(e) => HealthReport::unreachable(&e),
    };

    debug!(key = %key, healthy = report.is_healthy(), "Health probe finished");
    obs::emit_health_probed(report.is_healthy(), report.connected);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryKvBackend;

    #[tokio::test]
    async fn test_probe_healthy_and_cleans_up() {
        let kv = MemoryKvBackend::new();
        let report = probe(&kv, "health:test").await;

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.connected);
        assert!(report.read_write_ok);
        assert!(report.error.is_none());
        assert!(!kv.exists("health:test").await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let kv = MemoryKvBackend::new();
        kv.set_online(false);
        let report = probe(&kv, "health:test").await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.connected);
        assert!(!report.read_write_ok);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
    }
}
