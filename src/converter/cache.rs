//! Per-worker Converter Cache
//!
//! Maps a [`ConfigurationKey`] to a constructed converter. Each key owns a
//! slot with its own lock, so a caller that finds a slot under construction
//! waits for that build and reuses its result instead of building again.
//!
//! ```text
//! get_or_build(key)
//!     │
//!     ├─ lock map ─► find/insert slot ─► unlock map
//!     │
//!     └─ lock slot ─► Some(conv) → hit
//!                   └► None      → build() ─► Ok  → store, miss
//!                                          └► Err → slot stays empty
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::key::ConfigurationKey;
use crate::engine::Converter;

type Slot<C> = Arc<Mutex<Option<Arc<C>>>>;

/// Keyed converter store owned by a single worker
pub struct ConverterCache<C: ?Sized = dyn Converter> {
    slots: Mutex<LruCache<ConfigurationKey, Slot<C>>>,
    capacity: usize,
    builds: AtomicUsize,
    hits: AtomicUsize,
    failures: AtomicUsize,
}

impl<C: ?Sized> ConverterCache<C> {
    /// Create a cache; `capacity == 0` means unbounded
    pub fn new(capacity: usize) -> Self {
        let slots = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            slots: Mutex::new(slots),
            capacity,
            builds: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Return the converter for `key`, building it at most once.
    ///
    /// The boolean is `true` when an existing converter was reused. A failed
    /// build is returned to the caller and leaves the slot empty.
    pub fn get_or_build<E, F>(&self, key: &ConfigurationKey, build: F) -> Result<(Arc<C>, bool), E>
    where
        F: FnOnce() -> Result<Arc<C>, E>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot: Slot<C> = Arc::new(Mutex::new(None));
                    if let Some((evicted, _)) = slots.push(key.clone(), Arc::clone(&slot)) {
                        if &evicted != key {
                            tracing::debug!(key = %evicted.digest(), "Evicted converter");
                        }
                    }
                    slot
                }
            }
        };

        let mut guard = slot.lock();
        if let Some(converter) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((Arc::clone(converter), true));
        }

        match build() {
            Ok(converter) => {
                self.builds.fetch_add(1, Ordering::Relaxed);
                *guard = Some(Arc::clone(&converter));
                Ok((converter, false))
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Whether a built converter exists for `key`
    pub fn contains(&self, key: &ConfigurationKey) -> bool {
        self.slots
            .lock()
            .peek(key)
            .map(|slot| slot.lock().is_some())
            .unwrap_or(false)
    }

    /// Drop every converter
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            builds: self.builds.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl<C: ?Sized> Default for ConverterCache<C> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Converter cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    /// 0 = unbounded
    pub capacity: usize,
    pub builds: usize,
    pub hits: usize,
    pub failures: usize,
}

impl CacheStats {
    /// Fraction of lookups served without construction
    pub fn hit_rate(&self) -> f64 {
        let total = self.builds + self.hits;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterConfig;
    use std::thread;
    use std::time::Duration;

    fn key(lang: &str) -> ConfigurationKey {
        ConverterConfig::new().with("lang", lang).key()
    }

    #[test]
    fn test_builds_once_per_key() {
        let cache: ConverterCache<String> = ConverterCache::unbounded();
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Arc::new("converter".to_string()))
        };

        let (first, hit) = cache.get_or_build(&key("en"), build).unwrap();
        assert!(!hit);
        let (second, hit) = cache.get_or_build(&key("en"), build).unwrap();
        assert!(hit);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        cache.get_or_build(&key("ch"), build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_same_key_builds_once() {
        let cache: Arc<ConverterCache<String>> = Arc::new(ConverterCache::unbounded());
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                thread::spawn(move || {
                    cache
                        .get_or_build(&key("en"), || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok::<_, String>(Arc::new("converter".to_string()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|(_, hit)| !hit).count(), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0].0, &w[1].0)));
    }

    #[test]
    fn test_failed_build_does_not_poison() {
        let cache: ConverterCache<String> = ConverterCache::unbounded();

        let err = cache
            .get_or_build(&key("en"), || Err::<Arc<String>, _>("bad service"))
            .unwrap_err();
        assert_eq!(err, "bad service");
        assert!(!cache.contains(&key("en")));

        let (_, hit) = cache
            .get_or_build(&key("en"), || Ok::<_, &str>(Arc::new("ok".to_string())))
            .unwrap();
        assert!(!hit);
        assert!(cache.contains(&key("en")));

        let stats = cache.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.builds, 1);
    }

    #[test]
    fn test_bounded_cache_evicts_least_recent() {
        let cache: ConverterCache<String> = ConverterCache::new(2);
        let build = || Ok::<_, String>(Arc::new(String::new()));

        cache.get_or_build(&key("a"), build).unwrap();
        cache.get_or_build(&key("b"), build).unwrap();
        cache.get_or_build(&key("a"), build).unwrap();
        cache.get_or_build(&key("c"), build).unwrap();

        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().capacity, 2);
    }
}
