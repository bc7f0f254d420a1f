//! C1 — Bounded Store & Rate Limiter.
//!
//! A general-purpose bounded key/value store with pluggable eviction
//! (atomic sequence counter, evict-on-overflow), plus a sliding-window
//! rate limiter built on a bucket-of-timestamps per key.

use crate::config::StoreConfig;
use crate::types::error::StoreError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Eviction policy applied when the store is at capacity (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the least-recently-used entry.
    Lru,
    /// Evict entries whose `ttl` has elapsed; falls back to LRU if none expired.
    Ttl,
    /// Evict the lowest-`importance` entry, ties broken by LRU.
    Importance,
    /// Evict entries until total size is back under budget, largest first.
    Size,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_touched: Instant,
    ttl: Option<Duration>,
    importance: i32,
    size: usize,
    sequence: u64,
}

/// Aggregate counters exposed by `metrics()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreMetrics {
    pub len: usize,
    pub evictions: u64,
    pub inserts: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A bounded, evicting key/value store (C1). Thread-safe via an internal
/// `parking_lot::Mutex`; cheap to clone-and-share via `Arc` at the call site.
pub struct BoundedStore<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_size: usize,
    policy: EvictionPolicy,
    default_ttl: Option<Duration>,
    sequence: AtomicU64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    evictions: u64,
    inserts: u64,
    hits: u64,
    misses: u64,
    destroyed: bool,
}

impl<K, V> BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: EvictionPolicy, config: &StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                evictions: 0,
                inserts: 0,
                hits: 0,
                misses: 0,
                destroyed: false,
            }),
            max_size: config.max_size,
            policy,
            default_ttl: config.default_ttl,
            sequence: AtomicU64::new(0),
        }
    }

    /// Insert or overwrite `key`, evicting per policy when at capacity.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        self.set_with(key, value, None, 1)
    }

    /// Insert with an explicit TTL and importance weight.
    pub fn set_with(
        &self,
        key: K,
        value: V,
        ttl: Option<Duration>,
        importance: i32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(StoreError::Destroyed);
        }
        let now = Instant::now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        if !inner.map.contains_key(&key) && inner.map.len() >= self.max_size {
            self.evict_one(&mut inner, now);
        }

        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_touched: now,
                ttl: ttl.or(self.default_ttl),
                importance,
                size: 1,
                sequence,
            },
        );
        inner.inserts += 1;
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return None;
        }
        let now = Instant::now();
        let expired = inner
            .map
            .get(key)
            .map(|e| matches!(e.ttl, Some(ttl) if now.duration_since(e.inserted_at) > ttl))
            .unwrap_or(false);
        if expired {
            inner.map.remove(key);
            inner.misses += 1;
            return None;
        }
        if let Some(entry) = inner.map.get_mut(key) {
            entry.last_touched = now;
            inner.hits += 1;
            Some(entry.value.clone())
        } else {
            inner.misses += 1;
            None
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().map.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().map.keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Remove all TTL-expired entries regardless of policy. Idempotent.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.map.len();
        inner
            .map
            .retain(|_, e| !matches!(e.ttl, Some(ttl) if now.duration_since(e.inserted_at) > ttl));
        let removed = before - inner.map.len();
        inner.evictions += removed as u64;
        removed
    }

    pub fn metrics(&self) -> StoreMetrics {
        let inner = self.inner.lock();
        StoreMetrics {
            len: inner.map.len(),
            evictions: inner.evictions,
            inserts: inner.inserts,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Marks the store destroyed; further `set` calls fail. An explicit
    /// terminal state rather than relying on `Drop` for cleanup ordering.
    pub fn destroy(&self) {
        self.inner.lock().destroyed = true;
    }

    fn evict_one(&self, inner: &mut Inner<K, V>, now: Instant) {
        let victim = match self.policy {
            EvictionPolicy::Lru => inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_touched)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Ttl => {
                let expired = inner
                    .map
                    .iter()
                    .find(|(_, e)| matches!(e.ttl, Some(ttl) if now.duration_since(e.inserted_at) > ttl))
                    .map(|(k, _)| k.clone());
                expired.or_else(|| {
                    inner
                        .map
                        .iter()
                        .min_by_key(|(_, e)| e.last_touched)
                        .map(|(k, _)| k.clone())
                })
            }
            EvictionPolicy::Importance => inner
                .map
                .iter()
                .min_by_key(|(_, e)| (e.importance, e.last_touched))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Size => inner
                .map
                .iter()
                .max_by_key(|(_, e)| (e.size, std::cmp::Reverse(e.sequence)))
                .map(|(k, _)| k.clone()),
        };
        if let Some(key) = victim {
            inner.map.remove(&key);
            inner.evictions += 1;
        }
    }
}

/// Per-key sliding-window rate limiter (C1).
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Ok(())` if `key` has remaining budget in the current window,
    /// or `Err` with the retry-after delay otherwise. Admits the call as a
    /// side effect when it allows it (one check == one token spent).
    pub fn allow(&self, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_default();
        prune_bucket(bucket, now, self.window);
        if bucket.len() as u32 >= self.max_requests {
            let retry_after = bucket
                .front()
                .map(|&t| self.window.saturating_sub(now.duration_since(t)))
                .unwrap_or(self.window);
            return Err(StoreError::RateLimited {
                key: key.to_string(),
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }
        bucket.push_back(now);
        Ok(())
    }

    /// Budget remaining in the current window. A key with no recent
    /// activity is dropped from the map entirely rather than left behind
    /// as an empty bucket — keys expire after one window of inactivity.
    pub fn remaining(&self, key: &str) -> u32 {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let Some(bucket) = buckets.get_mut(key) else {
            return self.max_requests;
        };
        prune_bucket(bucket, now, self.window);
        if bucket.is_empty() {
            buckets.remove(key);
            return self.max_requests;
        }
        self.max_requests.saturating_sub(bucket.len() as u32)
    }

    pub fn ms_until_reset(&self, key: &str) -> u64 {
        let buckets = self.buckets.lock();
        let now = Instant::now();
        buckets
            .get(key)
            .and_then(|b| b.front())
            .map(|&t| self.window.saturating_sub(now.duration_since(t)).as_millis() as u64)
            .unwrap_or(0)
    }
}

fn prune_bucket(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = bucket.front() {
        if now.duration_since(front) > window {
            bucket.pop_front();
        } else {
            break;
        }
    }
}
