//! Redis Handle - Connection and Operations
//!
//! Owns one multiplexed connection to a Redis-compatible service and
//! implements [`KvBackend`] on top of it. Every command is bounded by the
//! configured response timeout; there is no retry in this layer.
//!
//! Configuration comes either from code (`BackendConfig::new` + `with_*`)
//! or from `RECALL_*` environment variables.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::storage_traits::{KvBackend, KvBatch, KvOp, RangeOrder, StorageResult};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_NAMESPACE: &str = "meshnet";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the key-value backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend address (hostname or IP)
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Logical database selector
    pub db_index: i64,
    /// Optional credential
    pub password: Option<String>,
    /// Key prefix shared by every record (`None` disables it)
    pub namespace: Option<String>,
    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,
    /// Upper bound on each command round trip
    pub response_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db_index: 0,
            password: None,
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            connect_timeout: DEFAULT_TIMEOUT,
            response_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BackendConfig {
    /// Create a configuration for the given address with default settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Select a logical database
    pub fn with_db_index(mut self, db_index: i64) -> Self {
        self.db_index = db_index;
        self
    }

    /// Authenticate with a password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the key namespace; an empty string disables it
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Use the same timeout for connecting and for each command
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.response_timeout = timeout;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - RECALL_REDIS_HOST (optional, default: "localhost")
    /// - RECALL_REDIS_PORT (optional, default: 6379)
    /// - RECALL_REDIS_DB (optional, default: 0)
    /// - RECALL_REDIS_PASSWORD (optional)
    /// - RECALL_NAMESPACE (optional, default: "meshnet"; empty disables)
    /// - RECALL_TIMEOUT_SECS (optional, default: 5)
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("RECALL_REDIS_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("RECALL_REDIS_PORT") {
            config.port = parse_field("RECALL_REDIS_PORT", &port)?;
        }
        if let Some(db) = lookup("RECALL_REDIS_DB") {
            config.db_index = parse_field("RECALL_REDIS_DB", &db)?;
        }
        if let Some(password) = lookup("RECALL_REDIS_PASSWORD") {
            config.password = (!password.is_empty()).then_some(password);
        }
        if let Some(namespace) = lookup("RECALL_NAMESPACE") {
            config = config.with_namespace(namespace);
        }
        if let Some(secs) = lookup("RECALL_TIMEOUT_SECS") {
            let secs: u64 = parse_field("RECALL_TIMEOUT_SECS", &secs)?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db_index,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: &str) -> StorageResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| StorageError::InvalidConfig {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

/// Redis connection handle
///
/// Cloning is cheap: clones share the same multiplexed connection, which is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct RedisHandle {
    conn: ConnectionManager,
}

impl RedisHandle {
    /// Connect to the backend and verify the connection with `PING`
    #[instrument(skip(config), fields(host = %config.host, port = config.port, db = config.db_index))]
    pub async fn connect(config: &BackendConfig) -> StorageResult<Self> {
        info!("Connecting to Redis backend");

        let client = redis::Client::open(config.connection_info())
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout)
            .set_response_timeout(config.response_timeout)
            .set_number_of_retries(0);

        let conn = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to connect to {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;

        let handle = RedisHandle { conn };
        handle.ping().await?;

        info!("Redis backend connected");
        Ok(handle)
    }

    /// Connect using `BackendConfig::from_env`
    pub async fn connect_from_env() -> StorageResult<Self> {
        let config = BackendConfig::from_env()?;
        Self::connect(&config).await
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvBackend for RedisHandle {
    async fn ping(&self) -> StorageResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StorageResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let count: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(count > 0)
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> StorageResult<Vec<String>> {
        let name = match order {
            RangeOrder::Ascending => "ZRANGE",
            RangeOrder::Descending => "ZREVRANGE",
        };
        let members: Vec<String> = redis::cmd(name)
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        let count: u64 = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn srandmember(&self, key: &str, count: usize) -> StorageResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let members: Vec<String> = redis::cmd("SRANDMEMBER")
            .arg(key)
            .arg(count)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut self.conn())
            .await?;
        Ok(keys)
    }

    async fn dbsize(&self) -> StorageResult<u64> {
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut self.conn()).await?;
        Ok(size)
    }

    async fn apply(&self, batch: KvBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                KvOp::Set { key, value, ttl } => {
                    let cmd = pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        cmd.arg("EX").arg(ttl_secs(ttl));
                    }
                    cmd.ignore();
                }
                KvOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();
                }
                KvOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(score).arg(member).ignore();
                }
                KvOp::ZRemRangeByRank { key, start, stop } => {
                    pipe.cmd("ZREMRANGEBYRANK")
                        .arg(key)
                        .arg(start)
                        .arg(stop)
                        .ignore();
                }
                KvOp::ZRemRangeByScore { key, max_exclusive } => {
                    pipe.cmd("ZREMRANGEBYSCORE")
                        .arg(key)
                        .arg("-inf")
                        .arg(format!("({max_exclusive}"))
                        .ignore();
                }
                KvOp::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                KvOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
            }
        }

        let _: () = pipe.query_async(&mut self.conn()).await?;
        debug!("Applied atomic batch");
        Ok(())
    }
}
