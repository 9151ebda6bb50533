//! Business key-space over a [`CacheStore`].
//!
//! Five families are cached: file metadata, file user lists, per (file, user)
//! roles, per (user, page, sort) listing pages and file annotation snapshots;
//! link lists are cached per file as well. None of them is authoritative.
//! Store failures are logged and degrade to a miss, so every caller must be
//! able to fall back to the relation store.

pub mod store;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{CacheConfig, CacheTtls};
use crate::error::AccessResult;
use crate::model::SortOrder;
pub use store::{CacheStore, CacheStoreRef, MemoryCacheStore, RedisCacheStore};

pub fn metadata_key(doc_id: Uuid) -> String {
    format!("file:meta:{doc_id}")
}

pub fn users_key(doc_id: Uuid) -> String {
    format!("file:users:{doc_id}")
}

pub fn role_key(doc_id: Uuid, email: &str) -> String {
    format!("file:role:{doc_id}:{email}")
}

pub fn listing_prefix(user_id: Uuid) -> String {
    format!("user:files:{user_id}:")
}

pub fn listing_key(user_id: Uuid, page: u32, sort: SortOrder) -> String {
    format!("{}{page}:{}", listing_prefix(user_id), sort.as_str())
}

pub fn annotations_key(doc_id: Uuid) -> String {
    format!("file:annotations:{doc_id}")
}

pub fn links_key(doc_id: Uuid) -> String {
    format!("file:links:{doc_id}")
}

#[derive(Debug, Default)]
struct CacheMetricsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Hit/miss/error counters for the access cache.
#[derive(Clone, Debug, Default)]
pub struct CacheMetrics {
    inner: Arc<CacheMetricsInner>,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.inner.errors.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AccessCache {
    store: CacheStoreRef,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl AccessCache {
    pub fn new(store: CacheStoreRef, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.config.ttls
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Only the first `max_cached_pages` listing pages are ever cached.
    pub fn listing_cacheable(&self, page: u32) -> bool {
        page >= 1 && page <= self.config.max_cached_pages
    }

    /// Typed read. Store failures and undecodable values count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(error) => {
                self.metrics.record_error();
                warn!(%key, %error, "cache read failed, falling back to source");
                return None;
            }
        };
        let Some(raw) = raw else {
            self.metrics.record_miss();
            debug!(%key, "cache miss");
            return None;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.metrics.record_hit();
                debug!(%key, "cache hit");
                Some(value)
            }
            Err(error) => {
                self.metrics.record_miss();
                warn!(%key, %error, "dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%key, %error, "cache value not serializable");
                return;
            }
        };
        if let Err(error) = self.store.set(key, raw, ttl).await {
            self.metrics.record_error();
            warn!(%key, %error, "cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(error) = self.store.delete(key).await {
            self.metrics.record_error();
            warn!(%key, %error, "cache delete failed");
        }
    }

    pub async fn delete_many(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(error) = self.store.delete_many(keys).await {
            self.metrics.record_error();
            warn!(count = keys.len(), %error, "cache batch delete failed");
        }
    }

    /// Keys that may exist under a listing prefix.
    ///
    /// The store has no scan primitive, so this enumerates every cacheable
    /// page in both sort orders instead.
    pub fn derived_keys(&self, prefix: &str) -> Vec<String> {
        (1..=self.config.max_cached_pages)
            .flat_map(|page| {
                SortOrder::ALL
                    .iter()
                    .map(move |sort| format!("{prefix}{page}:{}", sort.as_str()))
            })
            .collect()
    }

    pub async fn delete_by_prefix(&self, prefix: &str) {
        let keys = self.derived_keys(prefix);
        self.delete_many(&keys).await;
    }

    /// Read-through helper: serve from cache, else load and repopulate.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> AccessResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AccessResult<T>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn invalidate_listings(&self, user_id: Uuid) {
        self.delete_by_prefix(&listing_prefix(user_id)).await;
    }

    /// Drop every per-file entry (metadata, user list, annotations, links).
    pub async fn invalidate_document(&self, doc_id: Uuid) {
        self.delete_many(&[
            metadata_key(doc_id),
            users_key(doc_id),
            annotations_key(doc_id),
            links_key(doc_id),
        ])
        .await;
    }

    /// Drop what a membership change on `doc_id` can stale: the document
    /// metadata, its user list, each member's role, and the listings of
    /// members with a known identity.
    pub async fn invalidate_membership(&self, doc_id: Uuid, emails: &[String], user_ids: &[Uuid]) {
        let mut keys = vec![metadata_key(doc_id), users_key(doc_id)];
        keys.extend(emails.iter().map(|email| role_key(doc_id, email)));
        for user_id in user_ids {
            keys.extend(self.derived_keys(&listing_prefix(*user_id)));
        }
        self.delete_many(&keys).await;
    }
}
