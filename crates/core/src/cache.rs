//! Bounded LRU caches with TTL: attributes (L1), raw content (L2), and
//! transformed content (L3).
//!
//! Cache contents are advisory — a cold lookup must produce the same
//! observable result. TTL is checked on `get`; there is no background
//! sweeper. Each level serializes its bookkeeping behind one mutex; value
//! bytes are reference-counted so clones leave the critical section cheap.

use crate::types::FileAttrs;
use lru::LruCache;
use serde::Serialize;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// L2 key: a whole backing file, or one read window into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKey {
    Whole(PathBuf),
    Range(PathBuf, u64, u64),
}

impl ContentKey {
    pub fn path(&self) -> &Path {
        match self {
            ContentKey::Whole(p) => p,
            ContentKey::Range(p, _, _) => p,
        }
    }
}

/// L3 key: backing file plus the fingerprint of the pipeline that produced
/// the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformedKey {
    pub path: PathBuf,
    pub fingerprint: u64,
}

// ---------------------------------------------------------------------------
// One cache level
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    inserted: Instant,
    bytes: u64,
}

struct Inner<K: Hash + Eq, V> {
    map: LruCache<K, Entry<V>>,
    bytes: u64,
}

/// LRU map with TTL and optional entry-count / byte-size bounds.
pub struct TtlCache<K: Hash + Eq + Clone, V: Clone> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    max_entries: Option<usize>,
    max_bytes: Option<u64>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(
        ttl: Duration,
        max_entries: Option<usize>,
        max_bytes: Option<u64>,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner { map: LruCache::unbounded(), bytes: 0 }),
            ttl,
            max_entries,
            max_bytes,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a key, touching recency. Expired entries count as misses and
    /// are dropped on the spot.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let expired = match inner.map.peek(key) {
            Some(entry) => entry.inserted.elapsed() >= self.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            if let Some(entry) = inner.map.pop(key) {
                inner.bytes = inner.bytes.saturating_sub(entry.bytes);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let value = inner.map.get(key).map(|e| e.value.clone());
        self.hits.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Insert, evicting least-recently-used entries until the bounds hold.
    /// A value larger than the byte bound is never inserted.
    pub fn put(&self, key: K, value: V, bytes: u64) {
        if !self.enabled {
            return;
        }
        if let Some(max) = self.max_bytes {
            if bytes > max {
                return;
            }
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = inner.map.pop(&key) {
            inner.bytes = inner.bytes.saturating_sub(old.bytes);
        }
        inner.map.put(key, Entry { value, inserted: Instant::now(), bytes });
        inner.bytes += bytes;

        loop {
            let over_entries = self.max_entries.is_some_and(|max| inner.map.len() > max);
            let over_bytes = self.max_bytes.is_some_and(|max| inner.bytes > max);
            if !over_entries && !over_bytes {
                break;
            }
            match inner.map.pop_lru() {
                Some((_, entry)) => {
                    inner.bytes = inner.bytes.saturating_sub(entry.bytes);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drop every entry whose key matches the predicate.
    pub fn invalidate_matching(&self, pred: impl Fn(&K) -> bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let doomed: Vec<K> =
            inner.map.iter().filter(|(k, _)| pred(k)).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            if let Some(entry) = inner.map.pop(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.bytes);
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.map.clear();
        inner.bytes = 0;
    }

    pub fn stats(&self) -> CacheLevelStats {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        CacheLevelStats {
            entries: inner.map.len(),
            bytes: inner.bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one cache level.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLevelStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheLevelStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// The three levels
// ---------------------------------------------------------------------------

/// Sizing and TTL knobs, mirrored from the `cache` configuration table.
#[derive(Debug, Clone)]
pub struct CacheTuning {
    pub enabled: bool,
    pub l1_entries: usize,
    pub l2_size_bytes: u64,
    pub l3_size_bytes: u64,
    pub l1_ttl: Duration,
    pub l2_ttl: Duration,
    pub l3_ttl: Duration,
}

impl Default for CacheTuning {
    fn default() -> Self {
        Self {
            enabled: true,
            l1_entries: 10_000,
            l2_size_bytes: 512 * 1024 * 1024,
            l3_size_bytes: 1024 * 1024 * 1024,
            l1_ttl: Duration::from_secs(60),
            l2_ttl: Duration::from_secs(300),
            l3_ttl: Duration::from_secs(600),
        }
    }
}

/// The attribute, content, and transformed-content caches as one unit.
pub struct CacheSet {
    pub attrs: TtlCache<String, FileAttrs>,
    pub content: TtlCache<ContentKey, Arc<Vec<u8>>>,
    pub transformed: TtlCache<TransformedKey, Arc<Vec<u8>>>,
}

impl CacheSet {
    pub fn new(tuning: &CacheTuning) -> Self {
        Self {
            attrs: TtlCache::new(tuning.l1_ttl, Some(tuning.l1_entries), None, tuning.enabled),
            content: TtlCache::new(tuning.l2_ttl, None, Some(tuning.l2_size_bytes), tuning.enabled),
            transformed: TtlCache::new(
                tuning.l3_ttl,
                None,
                Some(tuning.l3_size_bytes),
                tuning.enabled,
            ),
        }
    }

    /// Invalidate a mount-relative subtree: the path itself, its descendants,
    /// and the immediate parent's attribute entry (its listing-derived attrs
    /// may now be wrong). When the backing path is known, content entries for
    /// that file and its descendants go too.
    pub fn invalidate(&self, mount_path: &str, real_path: Option<&Path>) {
        if mount_path.is_empty() {
            // Everything is a descendant of the root.
            self.attrs.clear();
        } else {
            let prefix = format!("{mount_path}/");
            let parent = crate::path::parent(mount_path).to_string();
            self.attrs
                .invalidate_matching(|k| k == mount_path || k.starts_with(&prefix) || *k == parent);
        }
        if let Some(real) = real_path {
            self.content
                .invalidate_matching(|k| k.path() == real || k.path().starts_with(real));
            self.transformed
                .invalidate_matching(|k| k.path == real || k.path.starts_with(real));
        }
    }

    pub fn clear(&self) {
        self.attrs.clear();
        self.content.clear();
        self.transformed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: Option<usize>, max_bytes: Option<u64>) -> TtlCache<String, u32> {
        TtlCache::new(Duration::from_secs(60), max_entries, max_bytes, true)
    }

    #[test]
    fn get_miss_then_hit() {
        let c = cache(None, None);
        assert_eq!(c.get(&"a".to_string()), None);
        c.put("a".into(), 1, 0);
        assert_eq!(c.get(&"a".to_string()), Some(1));
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn entry_bound_evicts_least_recently_used() {
        let c = cache(Some(2), None);
        c.put("a".into(), 1, 0);
        c.put("b".into(), 2, 0);
        // Touch "a" so "b" becomes the LRU entry.
        assert_eq!(c.get(&"a".to_string()), Some(1));
        c.put("c".into(), 3, 0);
        assert_eq!(c.get(&"b".to_string()), None);
        assert_eq!(c.get(&"a".to_string()), Some(1));
        assert_eq!(c.get(&"c".to_string()), Some(3));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn byte_bound_evicts_until_satisfied() {
        let c = cache(None, Some(100));
        c.put("a".into(), 1, 40);
        c.put("b".into(), 2, 40);
        c.put("c".into(), 3, 40);
        // 120 bytes > 100 — "a" (the LRU entry) must go.
        assert_eq!(c.get(&"a".to_string()), None);
        assert!(c.stats().bytes <= 100);
    }

    #[test]
    fn oversized_entry_is_never_inserted() {
        let c = cache(None, Some(100));
        c.put("big".into(), 1, 200);
        assert_eq!(c.get(&"big".to_string()), None);
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn ttl_expiry_counts_as_miss() {
        let c: TtlCache<String, u32> =
            TtlCache::new(Duration::from_millis(20), None, None, true);
        c.put("a".into(), 1, 0);
        assert_eq!(c.get(&"a".to_string()), Some(1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn reinsert_replaces_size_accounting() {
        let c = cache(None, Some(100));
        c.put("a".into(), 1, 60);
        c.put("a".into(), 2, 30);
        assert_eq!(c.stats().bytes, 30);
        assert_eq!(c.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn disabled_cache_never_stores() {
        let c: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), None, None, false);
        c.put("a".into(), 1, 0);
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn invalidate_subtree_and_parent() {
        let set = CacheSet::new(&CacheTuning::default());
        let attrs = FileAttrs::synthetic_dir(0, false);
        set.attrs.put("dir".into(), attrs.clone(), 0);
        set.attrs.put("dir/a.txt".into(), attrs.clone(), 0);
        set.attrs.put("dir/sub/b.txt".into(), attrs.clone(), 0);
        set.attrs.put("other.txt".into(), attrs.clone(), 0);
        set.attrs.put("".into(), attrs.clone(), 0);

        set.invalidate("dir/a.txt", None);
        // The entry and its parent go; siblings and unrelated paths stay.
        assert!(set.attrs.get(&"dir/a.txt".to_string()).is_none());
        assert!(set.attrs.get(&"dir".to_string()).is_none());
        assert!(set.attrs.get(&"dir/sub/b.txt".to_string()).is_some());
        assert!(set.attrs.get(&"other.txt".to_string()).is_some());

        set.invalidate("dir", None);
        assert!(set.attrs.get(&"dir/sub/b.txt".to_string()).is_none());
    }

    #[test]
    fn invalidate_content_by_real_path() {
        let set = CacheSet::new(&CacheTuning::default());
        let real = PathBuf::from("/backing/a.txt");
        set.content.put(ContentKey::Whole(real.clone()), Arc::new(vec![1]), 1);
        set.content.put(
            ContentKey::Range(PathBuf::from("/backing/b.txt"), 0, 4),
            Arc::new(vec![2]),
            1,
        );
        set.transformed
            .put(TransformedKey { path: real.clone(), fingerprint: 7 }, Arc::new(vec![3]), 1);

        set.invalidate("a.txt", Some(&real));
        assert!(set.content.get(&ContentKey::Whole(real.clone())).is_none());
        assert!(set
            .transformed
            .get(&TransformedKey { path: real, fingerprint: 7 })
            .is_none());
        assert!(set
            .content
            .get(&ContentKey::Range(PathBuf::from("/backing/b.txt"), 0, 4))
            .is_some());
    }
}
