//! Metadata store abstraction
//!
//! The cache and the lock only need a handful of key-value operations with
//! expiry. [`MemoryStore`] keeps them in-process; `RedisStore` (feature
//! `redis`) shares them across processes and machines.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Key-value operations the cache core relies on
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All fields of a hash; empty when the key is absent
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Replace hash fields and set the key expiry in one atomic step
    async fn hset_ex(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()>;

    /// Reset the expiry of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns true if it existed.
    async fn del(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value with expiry, overwriting any previous value
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set a string value with expiry only if the key is absent
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a string key only if it currently holds `expected`
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Expired slots are swept out on writes at most this often
const PURGE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct State {
    slots: HashMap<String, Slot>,
    last_purge: Instant,
}

impl State {
    /// Drop every expired slot if the last sweep is older than `interval`
    fn purge_if_due(&mut self, interval: Duration) {
        let now = Instant::now();
        if now.duration_since(self.last_purge) < interval {
            return;
        }
        self.slots.retain(|_, slot| slot.is_live(now));
        self.last_purge = now;
    }
}

/// In-process metadata store with per-key expiry.
///
/// Expired keys are dropped when touched, and writes periodically sweep out
/// the rest so keys that are never read again do not pile up.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    purge_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_interval(PURGE_INTERVAL)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                last_purge: Instant::now(),
            }),
            purge_interval,
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.slots.values().filter(|s| s.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drop the slot for `key` if it has expired, returning the live one
fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    let now = Instant::now();
    if slots.get(key).is_some_and(|s| !s.is_live(now)) {
        slots.remove(key);
    }
    slots.get_mut(key)
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        Ok(match live(&mut state.slots, key) {
            Some(Slot {
                value: Value::Hash(fields),
                ..
            }) => fields.clone(),
            _ => HashMap::new(),
        })
    }

    async fn hset_ex(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.purge_if_due(self.purge_interval);
        let mut hash = match live(&mut state.slots, key) {
            Some(Slot {
                value: Value::Hash(existing),
                ..
            }) => std::mem::take(existing),
            _ => HashMap::new(),
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        state.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Hash(hash),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match live(&mut state.slots, key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let existed = live(&mut state.slots, key).is_some();
        state.slots.remove(key);
        Ok(existed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(match live(&mut state.slots, key) {
            Some(Slot {
                value: Value::Str(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.purge_if_due(self.purge_interval);
        state.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_if_due(self.purge_interval);
        if live(&mut state.slots, key).is_some() {
            return Ok(false);
        }
        state.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let matches = matches!(
            live(&mut state.slots, key),
            Some(Slot { value: Value::Str(current), .. }) if current.as_str() == expected
        );
        if matches {
            state.slots.remove(key);
        }
        Ok(matches)
    }
}
