//! TTL cache with in-flight request deduplication.
//!
//! One `CacheStore` is built per process and shared by reference. Expiry is
//! measured against an injected `Clock`, so tests drive time explicitly.
//!
//! `acquire_or_join` guarantees at most one producer per key: concurrent
//! callers for a key that is already being produced await the same shared
//! future and receive the same result, success or error. The producer runs
//! on its own task, so it settles even when every caller has gone away.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::traits::Clock;

/// Lifetime of analysis results (stage outputs).
pub const ANALYSIS_TTL: Duration = Duration::from_secs(5 * 60);

/// Lifetime of lighter-weight lookups (opportunity scoring).
pub const LOOKUP_TTL: Duration = Duration::from_secs(60);

pub const DEFAULT_CAPACITY: usize = 100;

/// Producer failure shared with every waiter on the same key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0:#}")]
pub struct DedupError(Arc<anyhow::Error>);

impl DedupError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for DedupError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

type InFlight<V> = Shared<BoxFuture<'static, Result<V, DedupError>>>;

struct CacheEntry<V> {
    payload: V,
    timestamp: DateTime<Utc>,
    ttl: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub producer_runs: u64,
}

struct Inner<V> {
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<String, InFlight<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    producer_runs: AtomicU64,
}

pub struct CacheStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> {
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                default_ttl,
                capacity: capacity.max(1),
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                producer_runs: AtomicU64::new(0),
            }),
        }
    }

    /// Return the payload if it is younger than its TTL.
    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.inner.lookup(key);
        let counter = if hit.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Store with the default TTL, evicting the oldest entry when full.
    pub fn set(&self, key: impl Into<String>, payload: V) {
        self.inner.insert(key.into(), payload, self.inner.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, payload: V, ttl: Duration) {
        self.inner.insert(key.into(), payload, ttl);
    }

    /// Timestamp of a live entry.
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.inner.clock.now();
        let entries = self.inner.entries.lock().expect("cache lock poisoned");
        entries
            .get(key)
            .filter(|e| is_fresh(e, now))
            .map(|e| e.timestamp)
    }

    /// Cached value, or the result of an in-flight producer for `key`, or a
    /// fresh run of `producer`.
    ///
    /// The in-flight entry is removed when the producer settles, whatever
    /// the outcome. Only successful payloads are cached; an error reaches
    /// every waiter and the next caller starts a new producer.
    pub async fn acquire_or_join<F, Fut>(&self, key: &str, producer: F) -> Result<V, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.acquire_or_join_with_ttl(key, self.inner.default_ttl, producer)
            .await
    }

    pub async fn acquire_or_join_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<V, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let shared = {
            // Check-then-insert under the in-flight lock. A settling producer
            // caches before it deregisters, so a miss here is authoritative.
            let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock poisoned");
            match in_flight.get(key) {
                Some(pending) if pending.peek().is_none() => {
                    debug!(key, "Joining in-flight request");
                    pending.clone()
                }
                _ => {
                    if let Some(hit) = self.get(key) {
                        return Ok(hit);
                    }
                    self.inner.producer_runs.fetch_add(1, Ordering::Relaxed);
                    let handle =
                        tokio::spawn(settle(self.inner.clone(), key.to_string(), ttl, producer()));
                    let task = handle
                        .map(|joined| match joined {
                            Ok(result) => result,
                            Err(e) => Err(DedupError::from(anyhow!("Producer task aborted: {e}"))),
                        })
                        .boxed()
                        .shared();
                    in_flight.insert(key.to_string(), task.clone());
                    task
                }
            }
        };
        shared.await
    }

    /// Drop every cached payload. In-flight producers are left to settle.
    pub fn clear(&self) {
        self.inner
            .entries
            .lock()
            .expect("cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            producer_runs: self.inner.producer_runs.load(Ordering::Relaxed),
        }
    }
}

async fn settle<V, Fut>(
    inner: Arc<Inner<V>>,
    key: String,
    ttl: Duration,
    producer: Fut,
) -> Result<V, DedupError>
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>>,
{
    let result = match AssertUnwindSafe(producer).catch_unwind().await {
        Ok(produced) => produced.map_err(DedupError::from),
        Err(_) => {
            warn!(key = key.as_str(), "Producer panicked");
            Err(DedupError::from(anyhow!("Producer for {key} panicked")))
        }
    };
    if let Ok(ref payload) = result {
        inner.insert(key.clone(), payload.clone(), ttl);
    }
    inner
        .in_flight
        .lock()
        .expect("in-flight lock poisoned")
        .remove(&key);
    result
}

impl<V: Clone> Inner<V> {
    fn lookup(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if is_fresh(entry, now) => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: String, payload: V, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, e| is_fresh(e, now));
            while entries.len() >= self.capacity {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.timestamp)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                debug!(key = oldest.as_str(), "Evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                payload,
                timestamp: now,
                ttl,
            },
        );
    }
}

fn is_fresh<V>(entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
    // A timestamp in the future (clock skew) counts as age zero.
    let age = now
        .signed_duration_since(entry.timestamp)
        .to_std()
        .unwrap_or_default();
    age < entry.ttl
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::ManualClock;

    fn store(clock: &Arc<ManualClock>, capacity: usize) -> CacheStore<String> {
        CacheStore::new(clock.clone(), ANALYSIS_TTL, capacity)
    }

    #[test]
    fn entry_is_valid_until_ttl_elapses() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        cache.set("acme:media", "payload".to_string());

        clock.advance(ANALYSIS_TTL - Duration::from_millis(1));
        assert_eq!(cache.get("acme:media").as_deref(), Some("payload"));

        clock.advance(Duration::from_millis(2));
        assert_eq!(cache.get("acme:media"), None);
        assert!(cache.is_empty(), "expired entry is dropped on read");
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        cache.set_with_ttl("lookup", "x".to_string(), LOOKUP_TTL);
        clock.advance(LOOKUP_TTL + Duration::from_secs(1));
        assert_eq!(cache.get("lookup"), None);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 2);
        cache.set("a", "1".to_string());
        clock.advance(Duration::from_secs(1));
        cache.set("b", "2".to_string());
        clock.advance(Duration::from_secs(1));
        cache.set("c", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "3".to_string());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_producer() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        let runs = Arc::new(AtomicUsize::new(0));

        let callers = (0..8).map(|_| {
            let cache = cache.clone();
            let runs = runs.clone();
            async move {
                cache
                    .acquire_or_join("acme:competitive", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("shared".to_string())
                    })
                    .await
            }
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("shared")));
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.get("acme:competitive").as_deref(), Some("shared"));
    }

    #[tokio::test]
    async fn producer_error_reaches_every_waiter_and_is_not_cached() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        let runs = Arc::new(AtomicUsize::new(0));

        let callers = (0..3).map(|_| {
            let cache = cache.clone();
            let runs = runs.clone();
            async move {
                cache
                    .acquire_or_join("acme:media", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<String, _>(anyhow!("collector exploded"))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for result in &results {
            let err = result.as_ref().unwrap_err();
            assert_eq!(err.to_string(), "collector exploded");
        }
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight_len(), 0);

        let retried = cache
            .acquire_or_join("acme:media", || async { Ok("recovered".to_string()) })
            .await
            .unwrap();
        assert_eq!(retried, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_producer_still_settles_and_caches() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        let finished = Arc::new(AtomicUsize::new(0));

        let done = finished.clone();
        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            cache.acquire_or_join("acme:media", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok("late".to_string())
            }),
        )
        .await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.get("acme:media").as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn panicking_producer_is_an_error_and_deregisters() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);

        let err = cache
            .acquire_or_join("acme:trends", || async {
                if true {
                    panic!("collector bug");
                }
                Ok("unreachable".to_string())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(cache.in_flight_len(), 0);

        let retried = cache
            .acquire_or_join("acme:trends", || async { Ok("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(retried, "ok");
    }

    #[tokio::test]
    async fn cached_value_skips_producer() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        cache.set("k", "cached".to_string());

        let value = cache
            .acquire_or_join("k", || async { Err::<String, _>(anyhow!("should not run")) })
            .await
            .unwrap();
        assert_eq!(value, "cached");
        assert_eq!(cache.stats().producer_runs, 0);
    }

    #[tokio::test]
    async fn expired_value_reruns_producer() {
        let clock = Arc::new(ManualClock::new());
        let cache = store(&clock, 10);
        cache.set("k", "old".to_string());
        clock.advance(ANALYSIS_TTL + Duration::from_secs(1));

        let value = cache
            .acquire_or_join("k", || async { Ok("new".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "new");
    }
}
