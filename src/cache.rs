//! # Result Cache
//! In-memory memo of pipeline output per `(postcode, transaction type)`.
//!
//! - Absolute TTL: an entry older than `ttl` is never served (no sliding refresh).
//! - Capacity-bounded; on overflow the least recently used entry is evicted.
//! - Not durable across restarts.
//!
//! Concurrent misses for the same key may both write; last writer wins.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::SourceError;
use crate::listing::MergedListing;
use crate::query::Query;

pub type CacheKey = Query;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub listings: Arc<Vec<MergedListing>>,
    /// Source failures of the run that produced this entry (empty for a complete run).
    pub source_errors: BTreeMap<String, SourceError>,
    pub dropped_malformed: usize,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) <= self.ttl
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<CacheKey, Slot>,
    tick: u64,
}

#[derive(Debug)]
pub struct ResultCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    capacity: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, Instant::now())
    }

    /// Lookup against an explicit clock. Expired entries are evicted on the way.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let fresh = match inner.slots.get_mut(key) {
            Some(slot) if slot.entry.is_fresh_at(now) => {
                slot.last_used = tick;
                Some(slot.entry.clone())
            }
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            inner.slots.remove(key);
            record_entries(&inner);
            tracing::debug!(target: "cache", key = %key, "evicted expired entry");
        }
        fresh
    }

    pub fn put(&self, key: CacheKey, listings: Vec<MergedListing>) -> CacheEntry {
        self.put_with(key, listings, BTreeMap::new(), 0)
    }

    /// Store a run's output together with its source failures.
    pub fn put_with(
        &self,
        key: CacheKey,
        listings: Vec<MergedListing>,
        source_errors: BTreeMap<String, SourceError>,
        dropped_malformed: usize,
    ) -> CacheEntry {
        self.put_at(key, listings, source_errors, dropped_malformed, Instant::now())
    }

    pub fn put_at(
        &self,
        key: CacheKey,
        listings: Vec<MergedListing>,
        source_errors: BTreeMap<String, SourceError>,
        dropped_malformed: usize,
        now: Instant,
    ) -> CacheEntry {
        let entry = CacheEntry {
            key: key.clone(),
            listings: Arc::new(listings),
            source_errors,
            dropped_malformed,
            fetched_at: now,
            fetched_at_utc: Utc::now(),
            ttl: self.ttl,
        };

        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.slots.contains_key(&key) && inner.slots.len() >= self.capacity {
            let lru = inner
                .slots
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(k, _)| k.clone());
            if let Some(old) = lru {
                inner.slots.remove(&old);
                tracing::debug!(target: "cache", key = %old, "evicted least recently used entry");
            }
        }
        inner.slots.insert(
            key,
            Slot {
                entry: entry.clone(),
                last_used: tick,
            },
        );
        record_entries(&inner);
        entry
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        let removed = inner.slots.remove(key).is_some();
        record_entries(&inner);
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        record_entries(&inner);
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

fn record_entries(inner: &Inner) {
    metrics::gauge!("result_cache_entries").set(inner.slots.len() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TransactionType;

    fn key(pc: &str) -> CacheKey {
        Query::new(pc, TransactionType::Sale).unwrap()
    }

    #[test]
    fn put_then_get_within_ttl_returns_listings() {
        let cache = ResultCache::new(Duration::from_secs(60), 4);
        let k = key("SE6 2SP");
        let t0 = Instant::now();
        cache.put_at(k.clone(), vec![], BTreeMap::new(), 0, t0);
        let hit = cache.get_at(&k, t0 + Duration::from_secs(59)).unwrap();
        assert!(hit.listings.is_empty());
        assert_eq!(hit.key, k);
    }

    #[test]
    fn entry_expires_after_ttl_and_is_removed() {
        let cache = ResultCache::new(Duration::from_secs(60), 4);
        let k = key("SE6 2SP");
        let t0 = Instant::now();
        cache.put_at(k.clone(), vec![], BTreeMap::new(), 0, t0);
        assert!(cache.get_at(&k, t0 + Duration::from_secs(60)).is_some());
        assert!(cache
            .get_at(&k, t0 + Duration::from_secs(60) + Duration::from_millis(1))
            .is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        let (a, b, c) = (key("A1"), key("B2"), key("C3"));
        cache.put(a.clone(), vec![]);
        cache.put(b.clone(), vec![]);
        // touch `a` so `b` becomes the LRU entry
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), vec![]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn overwriting_a_key_does_not_evict_others() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.put(key("A1"), vec![]);
        cache.put(key("B2"), vec![]);
        cache.put(key("A1"), vec![]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = ResultCache::new(Duration::from_secs(60), 4);
        cache.put(key("A1"), vec![]);
        cache.put(key("B2"), vec![]);
        assert!(cache.invalidate(&key("A1")));
        assert!(!cache.invalidate(&key("A1")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cache = ResultCache::new(Duration::from_secs(1), 0);
        assert_eq!(cache.capacity(), 1);
    }
}
