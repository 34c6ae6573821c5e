//! Contract tests for `KvBackend` implementations
//!
//! Each contract is a generic async fn over `&dyn KvBackend`. They run
//! against the in-memory fake by default; the `redis_*` variants run the
//! same contracts against a live server:
//!
//!   RECALL_REDIS_HOST=localhost cargo test --test kv_contracts -- --ignored

use std::time::Duration;

use recall_state::fakes::MemoryKvBackend;
use recall_state::{BackendConfig, KvBackend, KvBatch, RangeOrder, RedisHandle};

async fn contract_get_set_delete(kv: &dyn KvBackend, ns: &str) {
    let key = format!("{ns}:plain");
    assert_eq!(kv.get(&key).await.unwrap(), None);

    kv.set(&key, "v1", None).await.unwrap();
    assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("v1"));
    assert!(kv.exists(&key).await.unwrap());

    let missing = format!("{ns}:missing");
    assert_eq!(kv.delete(&[key.clone(), missing]).await.unwrap(), 1);
    assert!(!kv.exists(&key).await.unwrap());
}

async fn contract_sorted_ranges(kv: &dyn KvBackend, ns: &str) {
    let key = format!("{ns}:zset");
    let mut batch = KvBatch::new();
    for (score, member) in [(3.0, "c"), (1.0, "a"), (2.0, "b")] {
        batch = batch.zadd(&key, member, score);
    }
    kv.apply(batch).await.unwrap();

    assert_eq!(kv.zcard(&key).await.unwrap(), 3);
    assert_eq!(
        kv.zrange(&key, 0, -1, RangeOrder::Ascending).await.unwrap(),
        vec!["a", "b", "c"]
    );
    assert_eq!(
        kv.zrange(&key, 0, 1, RangeOrder::Descending).await.unwrap(),
        vec!["c", "b"]
    );

    kv.apply(KvBatch::new().ztrim_newest(&key, 2)).await.unwrap();
    assert_eq!(
        kv.zrange(&key, 0, -1, RangeOrder::Ascending).await.unwrap(),
        vec!["b", "c"]
    );

    kv.apply(KvBatch::new().zdrop_older_than(&key, 3.0)).await.unwrap();
    assert_eq!(
        kv.zrange(&key, 0, -1, RangeOrder::Ascending).await.unwrap(),
        vec!["c"]
    );

    kv.delete(&[key]).await.unwrap();
}

async fn contract_sets(kv: &dyn KvBackend, ns: &str) {
    let key = format!("{ns}:set");
    kv.apply(KvBatch::new().sadd(&key, "x").sadd(&key, "y").sadd(&key, "x"))
        .await
        .unwrap();

    let mut all = kv.srandmember(&key, 10).await.unwrap();
    all.sort();
    assert_eq!(all, vec!["x", "y"]);
    assert_eq!(kv.srandmember(&key, 1).await.unwrap().len(), 1);

    kv.delete(&[key]).await.unwrap();
}

async fn contract_keys_pattern(kv: &dyn KvBackend, ns: &str) {
    let a = format!("{ns}:scan:a");
    let b = format!("{ns}:scan:b");
    kv.apply(KvBatch::new().set(&a, "1").set(&b, "2").set(format!("{ns}:other"), "3"))
        .await
        .unwrap();

    let mut found = kv.keys(&format!("{ns}:scan:*")).await.unwrap();
    found.sort();
    assert_eq!(found, vec![a.clone(), b.clone()]);
    assert!(kv.dbsize().await.unwrap() >= 3);

    kv.delete(&[a, b, format!("{ns}:other")]).await.unwrap();
}

async fn contract_ttl_applies(kv: &dyn KvBackend, ns: &str) {
    let key = format!("{ns}:ttl");
    kv.apply(KvBatch::new().set_ex(&key, "v", Duration::from_secs(60)))
        .await
        .unwrap();
    assert!(kv.exists(&key).await.unwrap());
    kv.delete(&[key]).await.unwrap();
}

#[tokio::test]
async fn test_fake_get_set_delete() {
    contract_get_set_delete(&MemoryKvBackend::new(), "contract").await;
}

#[tokio::test]
async fn test_fake_sorted_ranges() {
    contract_sorted_ranges(&MemoryKvBackend::new(), "contract").await;
}

#[tokio::test]
async fn test_fake_sets() {
    contract_sets(&MemoryKvBackend::new(), "contract").await;
}

#[tokio::test]
async fn test_fake_keys_pattern() {
    contract_keys_pattern(&MemoryKvBackend::new(), "contract").await;
}

#[tokio::test(start_paused = true)]
async fn test_fake_ttl() {
    let kv = MemoryKvBackend::new();
    contract_ttl_applies(&kv, "contract").await;

    kv.set("short", "v", Some(Duration::from_secs(5))).await.unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(kv.get("short").await.unwrap(), None);
    assert_eq!(kv.dbsize().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fake_expire_refreshes_existing_only() {
    let kv = MemoryKvBackend::new();
    kv.apply(KvBatch::new().expire("absent", Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(!kv.exists("absent").await.unwrap());
}

async fn live_redis() -> RedisHandle {
    let config = BackendConfig::from_env()
        .expect("valid RECALL_* environment")
        .with_db_index(15);
    RedisHandle::connect(&config)
        .await
        .expect("Redis reachable at RECALL_REDIS_HOST")
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn redis_contracts() {
    let kv = live_redis().await;
    let ns = format!("recall-contract-{}", std::process::id());

    kv.ping().await.unwrap();
    contract_get_set_delete(&kv, &ns).await;
    contract_sorted_ranges(&kv, &ns).await;
    contract_sets(&kv, &ns).await;
    contract_keys_pattern(&kv, &ns).await;
    contract_ttl_applies(&kv, &ns).await;
}

#[tokio::test]
#[ignore = "opens a real TCP connection"]
async fn redis_unreachable_port_is_connection_error() {
    let config = BackendConfig::new("127.0.0.1", 1).with_timeout(Duration::from_millis(500));
    let err = RedisHandle::connect(&config).await.err().unwrap();
    assert!(err.is_connectivity());
}
