//! In-memory fake for the key-value backend (testing only)
//!
//! `MemoryKvBackend` satisfies the [`KvBackend`] contract without a running
//! server. Expiry uses `tokio::time::Instant`, so tests can pause the clock
//! and `advance` past a TTL instead of sleeping.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StorageError;
use crate::storage_traits::{KvBackend, KvBatch, KvOp, RangeOrder, StorageResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// Kept sorted by (score, member), like a Redis sorted set.
    ZSet(Vec<(f64, String)>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

fn by_score(a: &(f64, String), b: &(f64, String)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

/// Resolve Redis-style inclusive ranks against a collection of `len` items.
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob match supporting `*` and `?`, enough for `KEYS prefix*`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// In-memory key-value backend backed by a `HashMap<key, Slot>`.
#[derive(Debug)]
pub struct MemoryKvBackend {
    slots: Mutex<HashMap<String, Slot>>,
    online: AtomicBool,
}

impl Default for MemoryKvBackend {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    /// While offline every call fails with [`StorageError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    /// Overwrite a key with a raw string, bypassing any record encoding.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.lock().insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
    }

    /// Add a raw member to a sorted collection, bypassing record encoding.
    pub fn zadd_raw(&self, key: &str, member: &str, score: f64) {
        let mut slots = self.lock();
        let now = Instant::now();
        // A key of another type is left as is.
        let _ = zadd(&mut slots, now, key, member, score);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.online.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    fn live_slot<'a>(
        slots: &'a mut HashMap<String, Slot>,
        now: Instant,
        key: &str,
    ) -> Option<&'a mut Slot> {
        if slots.get(key).is_some_and(|slot| !slot.live(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }
}

fn zadd(
    slots: &mut HashMap<String, Slot>,
    now: Instant,
    key: &str,
    member: &str,
    score: f64,
) -> StorageResult<()> {
    let slot = match MemoryKvBackend::live_slot(slots, now, key) {
        Some(slot) => slot,
        None => slots.entry(key.to_string()).or_insert(Slot {
            value: Value::ZSet(Vec::new()),
            expires_at: None,
        }),
    };
    let Value::ZSet(members) = &mut slot.value else {
        return Err(wrong_type(key));
    };
    members.retain(|(_, m)| m != member);
    members.push((score, member.to_string()));
    members.sort_by(by_score);
    Ok(())
}

fn apply_op(slots: &mut HashMap<String, Slot>, now: Instant, op: KvOp) -> StorageResult<()> {
    match op {
        KvOp::Set { key, value, ttl } => {
            slots.insert(
                key,
                Slot {
                    value: Value::Str(value),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        }
        KvOp::Expire { key, ttl } => {
            if let Some(slot) = MemoryKvBackend::live_slot(slots, now, &key) {
                slot.expires_at = Some(now + ttl);
            }
        }
        KvOp::ZAdd { key, member, score } => zadd(slots, now, &key, &member, score)?,
        KvOp::ZRemRangeByRank { key, start, stop } => {
            if let Some(slot) = MemoryKvBackend::live_slot(slots, now, &key) {
                let Value::ZSet(members) = &mut slot.value else {
                    return Err(wrong_type(&key));
                };
                if let Some((from, to)) = rank_window(members.len(), start, stop) {
                    members.drain(from..=to);
                }
                if members.is_empty() {
                    slots.remove(&key);
                }
            }
        }
        KvOp::ZRemRangeByScore { key, max_exclusive } => {
            if let Some(slot) = MemoryKvBackend::live_slot(slots, now, &key) {
                let Value::ZSet(members) = &mut slot.value else {
                    return Err(wrong_type(&key));
                };
                members.retain(|(score, _)| *score >= max_exclusive);
                if members.is_empty() {
                    slots.remove(&key);
                }
            }
        }
        KvOp::SAdd { key, member } => {
            let slot = match MemoryKvBackend::live_slot(slots, now, &key) {
                Some(slot) => slot,
                None => slots.entry(key.clone()).or_insert(Slot {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                }),
            };
            let Value::Set(members) = &mut slot.value else {
                return Err(wrong_type(&key));
            };
            members.insert(member);
        }
        KvOp::Delete { key } => {
            slots.remove(&key);
        }
    }
    Ok(())
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn ping(&self) -> StorageResult<()> {
        self.check_online()
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_online()?;
        let mut slots = self.lock();
        match Self::live_slot(&mut slots, Instant::now(), key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StorageResult<()> {
        self.check_online()?;
        let mut slots = self.lock();
        apply_op(
            &mut slots,
            Instant::now(),
            KvOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<u64> {
        self.check_online()?;
        let mut slots = self.lock();
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(slot) = slots.remove(key) {
                if slot.live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check_online()?;
        let mut slots = self.lock();
        Ok(Self::live_slot(&mut slots, Instant::now(), key).is_some())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> StorageResult<Vec<String>> {
        self.check_online()?;
        let mut slots = self.lock();
        let members = match Self::live_slot(&mut slots, Instant::now(), key) {
            None => return Ok(Vec::new()),
            Some(Slot {
                value: Value::ZSet(members),
                ..
            }) => members,
            Some(_) => return Err(wrong_type(key)),
        };

        let ordered: Vec<&String> = match order {
            RangeOrder::Ascending => members.iter().map(|(_, m)| m).collect(),
            RangeOrder::Descending => members.iter().rev().map(|(_, m)| m).collect(),
        };
        Ok(match rank_window(ordered.len(), start, stop) {
            Some((from, to)) => ordered[from..=to].iter().map(|m| (*m).clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        self.check_online()?;
        let mut slots = self.lock();
        match Self::live_slot(&mut slots, Instant::now(), key) {
            None => Ok(0),
            Some(Slot {
                value: Value::ZSet(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn srandmember(&self, key: &str, count: usize) -> StorageResult<Vec<String>> {
        self.check_online()?;
        let mut slots = self.lock();
        match Self::live_slot(&mut slots, Instant::now(), key) {
            None => Ok(Vec::new()),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().take(count).cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        self.check_online()?;
        let mut slots = self.lock();
        let now = Instant::now();
        slots.retain(|_, slot| slot.live(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn dbsize(&self) -> StorageResult<u64> {
        self.check_online()?;
        let mut slots = self.lock();
        let now = Instant::now();
        slots.retain(|_, slot| slot.live(now));
        Ok(slots.len() as u64)
    }

    async fn apply(&self, batch: KvBatch) -> StorageResult<()> {
        self.check_online()?;
        let mut slots = self.lock();
        let now = Instant::now();

        // EXEC runs every queued command; a failing one does not undo the
        // others. The first failure is reported.
        let mut first_err = None;
        for op in batch.into_ops() {
            if let Err(e) = apply_op(&mut slots, now, op) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
