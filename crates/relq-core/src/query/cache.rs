//! Process-wide caches for compiled artifacts.
//!
//! Rendering a statement is cheap next to executing it, but the closures
//! that shuttle rows (key appenders, include binders, materialization
//! plans) and the include fetch headers are reused across statements
//! with the same shape. They cache here, keyed by structural
//! fingerprints, and are never evicted.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::include::{IncludeBinder, KeyAppender};
use crate::row::Materializer;

/// Hit and miss counters for one cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub name: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// A fingerprint-keyed cache of shared compiled artifacts.
pub(crate) struct CompiledCache<V: ?Sized> {
    name: &'static str,
    entries: RwLock<HashMap<u64, Arc<V>>>,
    stats: CacheStats,
}

impl<V: ?Sized> CompiledCache<V> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, key: u64) -> Option<Arc<V>> {
        let hit = self.entries.read().get(&key).cloned();
        match &hit {
            Some(_) => self.stats.record_hit(),
            None => {
                self.stats.record_miss();
                tracing::trace!(cache = self.name, key, "cache miss");
            }
        }
        hit
    }

    /// Insert, keeping an entry another thread may have won with.
    pub fn insert(&self, key: u64, value: Arc<V>) -> Arc<V> {
        self.entries
            .write()
            .entry(key)
            .or_insert(value)
            .clone()
    }

    pub fn get_or_insert_with(&self, key: u64, build: impl FnOnce() -> Arc<V>) -> Arc<V> {
        if let Some(hit) = self.get(key) {
            return hit;
        }
        let built = build();
        self.insert(key, built)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            name: self.name,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            entries: self.entries.read().len(),
        }
    }
}

/// A fingerprint-keyed cache of rendered SQL fragments.
pub(crate) struct SqlTextCache {
    name: &'static str,
    entries: DashMap<u64, Arc<str>>,
    stats: CacheStats,
}

impl SqlTextCache {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn get_or_insert_with(&self, key: u64, build: impl FnOnce() -> String) -> Arc<str> {
        if let Some(hit) = self.entries.get(&key) {
            self.stats.record_hit();
            return hit.clone();
        }
        self.stats.record_miss();
        tracing::trace!(cache = self.name, key, "cache miss");
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::from(build()))
            .clone()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            name: self.name,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            entries: self.entries.len(),
        }
    }
}

pub(crate) static FETCH_SQL: LazyLock<SqlTextCache> =
    LazyLock::new(|| SqlTextCache::new("include_fetch_sql"));

pub(crate) static APPENDERS: LazyLock<CompiledCache<KeyAppender>> =
    LazyLock::new(|| CompiledCache::new("key_appenders"));

pub(crate) static BINDERS: LazyLock<CompiledCache<IncludeBinder>> =
    LazyLock::new(|| CompiledCache::new("include_binders"));

pub(crate) static READERS: LazyLock<CompiledCache<Materializer>> =
    LazyLock::new(|| CompiledCache::new("materializers"));

/// Counters for every compilation cache in the process.
pub fn cache_snapshot() -> Vec<CacheSnapshot> {
    vec![
        FETCH_SQL.snapshot(),
        APPENDERS.snapshot(),
        BINDERS.snapshot(),
        READERS.snapshot(),
    ]
}

/// Hash arbitrary keys into a cache fingerprint.
pub(crate) fn fingerprint(write: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    write(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_cache_counts_hits_and_misses() {
        let cache: CompiledCache<str> = CompiledCache::new("test");
        assert!(cache.get(1).is_none());
        cache.insert(1, Arc::from("one"));
        assert_eq!(cache.get(1).as_deref(), Some("one"));
        let snap = cache.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.entries, 1);
    }

    #[test]
    fn test_insert_keeps_first_entry() {
        let cache: CompiledCache<str> = CompiledCache::new("test");
        let first = cache.insert(7, Arc::from("first"));
        let second = cache.insert(7, Arc::from("second"));
        assert_eq!(&*first, "first");
        assert_eq!(&*second, "first");
    }

    #[test]
    fn test_sql_text_cache_builds_once() {
        let cache = SqlTextCache::new("test");
        let mut builds = 0;
        let a = cache.get_or_insert_with(9, || {
            builds += 1;
            "SELECT 1".to_string()
        });
        let b = cache.get_or_insert_with(9, || {
            builds += 1;
            "SELECT 2".to_string()
        });
        assert_eq!(builds, 1);
        assert_eq!(&*a, "SELECT 1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.snapshot().hits, 1);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
