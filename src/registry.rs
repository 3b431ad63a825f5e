//! Cache-aside service registry: logical service name -> base URL.
//!
//! Records live in one well-known hash key in the shared store and are
//! mirrored in a per-instance cache with a short freshness window. Reads
//! prefer the fresh cache, then the store, then — only when the store is
//! unreachable — the cache regardless of age, with the caller told the
//! answer is stale. Writes must reach the store or fail; they are never
//! silently cached-only.
//!
//! Registry mutations made on another gateway instance (or a deletion) may
//! take up to the freshness window to be observed here. That consistency
//! trade is deliberate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::GatewayError;
use crate::store::SharedStore;

/// A successful lookup. `stale` is set when the value came from an expired
/// cache entry because the store could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub url: String,
    pub stale: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` caches a confirmed "not registered" answer.
    url: Option<String>,
    cached_at: Instant,
}

pub struct ServiceRegistry {
    store: Arc<dyn SharedStore>,
    cache: DashMap<String, CacheEntry>,
    key: String,
    fresh_for: Duration,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, namespace: &str, fresh_for: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            key: format!("gatehouse:{namespace}:services"),
            fresh_for,
        }
    }

    /// Register (or update) a service. The write must reach the store; on
    /// success the local cache is refreshed so the mapping is immediately
    /// visible on this instance.
    pub async fn set(&self, name: &str, url: &str) -> Result<(), GatewayError> {
        validate_name(name)?;
        validate_url(url)?;

        self.store
            .hset(&self.key, name, url)
            .await
            .map_err(|_| GatewayError::StoreUnavailable)?;

        self.cache.insert(
            name.to_string(),
            CacheEntry {
                url: Some(url.to_string()),
                cached_at: Instant::now(),
            },
        );

        tracing::info!(service = name, url, "service registered");
        Ok(())
    }

    /// Resolve a service name. Never fails; unavailability degrades to the
    /// cached answer (any age) or "not found."
    pub async fn get(&self, name: &str) -> Option<ResolvedService> {
        if let Some(entry) = self.cache.get(name) {
            if entry.cached_at.elapsed() < self.fresh_for {
                tracing::debug!(service = name, "registry cache hit");
                return entry.url.clone().map(|url| ResolvedService {
                    url,
                    stale: false,
                });
            }
        }

        match self.store.hget(&self.key, name).await {
            Ok(url) => {
                // Cache the answer either way: a confirmed miss is as
                // cacheable as a hit.
                self.cache.insert(
                    name.to_string(),
                    CacheEntry {
                        url: url.clone(),
                        cached_at: Instant::now(),
                    },
                );
                url.map(|url| ResolvedService { url, stale: false })
            }
            Err(e) => {
                let entry = self.cache.get(name)?;
                let url = entry.url.clone()?;
                tracing::warn!(
                    service = name,
                    error = %e,
                    "store unreachable, serving expired registry cache entry"
                );
                Some(ResolvedService { url, stale: true })
            }
        }
    }

    /// Deregister a service. The local cache entry is evicted even when the
    /// store write fails, so this node never serves the deleted record.
    pub async fn remove(&self, name: &str) -> Result<(), GatewayError> {
        let result = self.store.hdel(&self.key, name).await;
        self.cache.remove(name);

        result.map_err(|_| GatewayError::StoreUnavailable)?;
        tracing::info!(service = name, "service removed");
        Ok(())
    }

    /// All registered services, straight from the store. Administrative
    /// operation: no cache path, fails when the store is down.
    pub async fn all(&self) -> Result<HashMap<String, String>, GatewayError> {
        self.store
            .hgetall(&self.key)
            .await
            .map_err(|_| GatewayError::StoreUnavailable)
    }

    #[cfg(test)]
    fn evict_all(&self) {
        self.cache.clear();
    }
}

fn validate_name(name: &str) -> Result<(), GatewayError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(GatewayError::InvalidServiceName(name.to_string()))
    }
}

fn validate_url(raw: &str) -> Result<(), GatewayError> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        Ok(parsed) => Err(GatewayError::InvalidServiceUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        }),
        Err(e) => Err(GatewayError::InvalidServiceUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::store::{ConnectionState, ConnectionStatus, SharedStore, StoreError};

    /// In-memory store with per-operation call counters and a switchable
    /// availability flag, for asserting which path the registry took.
    #[derive(Default)]
    struct CountingStore {
        hashes: Mutex<HashMap<String, HashMap<String, String>>>,
        down: AtomicBool,
        reads: AtomicU64,
        writes: AtomicU64,
    }

    impl CountingStore {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::Relaxed);
        }

        fn reads(&self) -> u64 {
            self.reads.load(Ordering::Relaxed)
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::Relaxed) {
                Err(StoreError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl crate::store::SharedStore for CountingStore {
        fn is_available(&self) -> bool {
            !self.down.load(Ordering::Relaxed)
        }

        fn status(&self) -> ConnectionStatus {
            ConnectionState::new(true).status()
        }

        async fn connect(&self) {}
        async fn disconnect(&self) {}

        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _expiry: Option<std::time::Duration>,
        ) -> Result<(), StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn del(&self, _key: &str) -> Result<(), StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn pttl(&self, _key: &str) -> Result<Option<std::time::Duration>, StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn incr_with_expiry(
            &self,
            _key: &str,
            _window: std::time::Duration,
        ) -> Result<(i64, std::time::Duration), StoreError> {
            unimplemented!("registry only touches hash operations")
        }

        async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
            self.check()?;
            self.reads.fetch_add(1, Ordering::Relaxed);
            let hashes = self.hashes.lock().unwrap();
            Ok(hashes.get(key).and_then(|h| h.get(field)).cloned())
        }

        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
            self.check()?;
            self.writes.fetch_add(1, Ordering::Relaxed);
            let mut hashes = self.hashes.lock().unwrap();
            hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
            Ok(())
        }

        async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
            self.check()?;
            self.writes.fetch_add(1, Ordering::Relaxed);
            let mut hashes = self.hashes.lock().unwrap();
            if let Some(h) = hashes.get_mut(key) {
                h.remove(field);
            }
            Ok(())
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
            self.check()?;
            self.reads.fetch_add(1, Ordering::Relaxed);
            let hashes = self.hashes.lock().unwrap();
            Ok(hashes.get(key).cloned().unwrap_or_default())
        }
    }

    fn registry(fresh_for: Duration) -> (Arc<CountingStore>, ServiceRegistry) {
        let store = Arc::new(CountingStore::default());
        let registry = ServiceRegistry::new(Arc::clone(&store) as _, "test", fresh_for);
        (store, registry)
    }

    #[tokio::test]
    async fn fresh_write_is_served_from_cache() {
        let (store, registry) = registry(Duration::from_secs(10));

        registry.set("user", "http://localhost:3001").await.unwrap();
        let before = store.reads();

        let resolved = registry.get("user").await.unwrap();
        assert_eq!(resolved.url, "http://localhost:3001");
        assert!(!resolved.stale);
        assert_eq!(store.reads(), before, "fresh cache hit must not touch the store");
    }

    #[tokio::test]
    async fn expired_entry_refreshes_from_store() {
        let (store, registry) = registry(Duration::ZERO);

        registry.set("user", "http://localhost:3001").await.unwrap();
        let before = store.reads();

        let resolved = registry.get("user").await.unwrap();
        assert_eq!(resolved.url, "http://localhost:3001");
        assert_eq!(store.reads(), before + 1);
    }

    #[tokio::test]
    async fn outage_falls_back_to_expired_cache() {
        let (store, registry) = registry(Duration::ZERO);

        registry.set("user", "http://localhost:3001").await.unwrap();
        store.set_down(true);

        let resolved = registry.get("user").await.unwrap();
        assert_eq!(resolved.url, "http://localhost:3001");
        assert!(resolved.stale);
    }

    #[tokio::test]
    async fn outage_without_cache_is_not_found() {
        let (store, registry) = registry(Duration::from_secs(10));
        store.set_down(true);

        assert!(registry.get("user").await.is_none());
    }

    #[tokio::test]
    async fn remove_is_immediately_visible_locally() {
        let (_store, registry) = registry(Duration::from_secs(10));

        registry.set("user", "http://localhost:3001").await.unwrap();
        registry.remove("user").await.unwrap();

        // The prior cache entry was fresh, yet the deletion must win.
        assert!(registry.get("user").await.is_none());
    }

    #[tokio::test]
    async fn confirmed_miss_is_cached_as_negative() {
        let (store, registry) = registry(Duration::from_secs(10));

        assert!(registry.get("ghost").await.is_none());
        let after_first = store.reads();

        assert!(registry.get("ghost").await.is_none());
        assert_eq!(store.reads(), after_first, "negative answer should be cached");
    }

    #[tokio::test]
    async fn deleted_record_expires_into_real_not_found() {
        let (store, registry) = registry(Duration::ZERO);

        registry.set("user", "http://localhost:3001").await.unwrap();
        // Another instance deletes the record; our cache entry has expired.
        store
            .hdel("gatehouse:test:services", "user")
            .await
            .unwrap();
        registry.evict_all();

        assert!(registry.get("user").await.is_none());
    }

    #[tokio::test]
    async fn write_requires_store() {
        let (store, registry) = registry(Duration::from_secs(10));
        store.set_down(true);

        let err = registry.set("user", "http://localhost:3001").await;
        assert!(matches!(err, Err(GatewayError::StoreUnavailable)));
        // And the failed write must not be served from cache afterwards.
        store.set_down(false);
        assert!(registry.get("user").await.is_none());
    }

    #[tokio::test]
    async fn rejects_relative_and_non_http_urls() {
        let (_store, registry) = registry(Duration::from_secs(10));

        assert!(matches!(
            registry.set("user", "localhost:3001").await,
            Err(GatewayError::InvalidServiceUrl { .. })
        ));
        assert!(matches!(
            registry.set("user", "ftp://example.com").await,
            Err(GatewayError::InvalidServiceUrl { .. })
        ));
        assert!(matches!(
            registry.set("bad/name", "http://localhost:3001").await,
            Err(GatewayError::InvalidServiceName(_))
        ));
    }

    #[tokio::test]
    async fn all_lists_store_contents() {
        let (store, registry) = registry(Duration::from_secs(10));

        registry.set("user", "http://localhost:3001").await.unwrap();
        registry.set("order", "http://localhost:3003").await.unwrap();

        let all = registry.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["user"], "http://localhost:3001");

        store.set_down(true);
        assert!(matches!(
            registry.all().await,
            Err(GatewayError::StoreUnavailable)
        ));
    }
}
