//! Generic TTL key/value adapters with no business meaning.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client as RedisClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AccessError, AccessResult};

/// Minimal TTL key/value store used by the access cache.
///
/// Implementations report unavailability as [`AccessError::Transient`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AccessResult<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> AccessResult<()>;
    async fn delete(&self, key: &str) -> AccessResult<()>;

    /// Remove several keys; stores that can batch should override this.
    async fn delete_many(&self, keys: &[String]) -> AccessResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

pub type CacheStoreRef = Arc<dyn CacheStore>;

/// Redis-backed store.
pub struct RedisCacheStore {
    conn: ConnectionManager,
    namespace: String,
}

fn transient(err: redis::RedisError) -> AccessError {
    AccessError::transient(format!("redis: {err}"))
}

impl RedisCacheStore {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = RedisClient::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> AccessResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(transient)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AccessResult<()> {
        let mut conn = self.conn.clone();
        // SET EX rejects a zero expiry
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, secs)
            .await
            .map_err(transient)
    }

    async fn delete(&self, key: &str) -> AccessResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(transient)
    }

    async fn delete_many(&self, keys: &[String]) -> AccessResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await.map_err(transient)
    }
}

/// Expired entries are swept on every this-many writes.
const SWEEP_EVERY: usize = 64;

/// `None` never expires: the TTL reached past what `Instant` can represent.
type Expiry = Option<Instant>;

fn live(expires: &Expiry, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

/// In-process store used when no Redis URL is configured, and in tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Expiry)>>,
    writes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| live(expires, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |(_, expires)| live(expires, Instant::now()))
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, expires)| live(expires, now));
        before - entries.len()
    }

    /// Entries held, expired or not.
    #[cfg(test)]
    pub(crate) fn stored(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> AccessResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if live(expires, Instant::now()) => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AccessResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            entries.retain(|_, (_, expires)| live(expires, now));
        }
        entries.insert(key.to_string(), (value, now.checked_add(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> AccessResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
