use crate::types::{FlagGrid, RasterGrid, Rectangle};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Fully computed anomaly result for one tile rectangle: the bitmask plane
/// and, when diagnostics are enabled, the two slope diagnostic planes.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    pub flags: FlagGrid,
    pub max_slope: Option<RasterGrid>,
    pub max_slope_band_index: Option<FlagGrid>,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
}

/// LRU cache of computed tile results keyed by rectangle identity.
///
/// The host framework requests the same rectangle once per declared target
/// band (bitmask plus up to two diagnostics), so a small capacity suffices.
/// Insertion keeps the first result for a rectangle; concurrent computations
/// of the same rectangle are deterministic, so either result is canonical.
pub struct TileResultCache {
    cache: Mutex<LruCache<Rectangle, Arc<TileResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TileResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up the result for a rectangle, promoting it in LRU order
    pub fn get(&self, rect: &Rectangle) -> Option<Arc<TileResult>> {
        let mut cache = self.lock();
        if let Some(result) = cache.get(rect) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(result))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a computed result, returning the canonical entry for the
    /// rectangle. If another thread inserted the same rectangle first, its
    /// entry is kept and returned.
    pub fn insert(&self, rect: Rectangle, result: Arc<TileResult>) -> Arc<TileResult> {
        let mut cache = self.lock();
        if let Some(existing) = cache.get(&rect) {
            return Arc::clone(existing);
        }
        if let Some((evicted_rect, _)) = cache.push(rect, Arc::clone(&result)) {
            if evicted_rect != rect {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Rectangle, Arc<TileResult>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
