//! LRU memoization of parse results
//!
//! Entries are keyed by format id, requested byte range and a fingerprint of
//! the input and schema text. Nothing is invalidated automatically: buffers
//! are immutable once handed over, so an entry only goes away through
//! eviction or [`ResultCache::clear`].

use rustc_hash::FxHasher;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Identity of a cached result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub format_id: String,
    /// Requested byte range; `None` for a whole-buffer parse
    pub range: Option<(usize, usize)>,
    pub fingerprint: u64,
}

impl CacheKey {
    pub fn new(format_id: impl Into<String>, range: Option<(usize, usize)>, fingerprint: u64) -> Self {
        Self {
            format_id: format_id.into(),
            range,
            fingerprint,
        }
    }
}

/// Fingerprint of an input buffer parsed with a given schema source
pub fn fingerprint(data: &[u8], schema_source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    schema_source.hash(&mut hasher);
    data.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a window of a `len`-byte source starting at `start`
///
/// Only the window is hashed, so the cost follows the window size rather
/// than the file size.
pub fn window_fingerprint(len: usize, start: usize, window: &[u8], schema_source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    schema_source.hash(&mut hasher);
    len.hash(&mut hasher);
    start.hash(&mut hasher);
    window.hash(&mut hasher);
    hasher.finish()
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Slot<V> {
    value: V,
    tick: u64,
}

struct LruState<V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<CacheKey, Slot<V>>,
    /// Last-use tick to key, oldest first
    order: BTreeMap<u64, CacheKey>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Entry-count bounded LRU cache, safe to share between threads
pub struct ResultCache<V> {
    state: Mutex<LruState<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// A cache holding at most `capacity` entries; 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                capacity,
                tick: 0,
                entries: HashMap::new(),
                order: BTreeMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, marking it as most recently used
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;

        match state.entries.get_mut(key) {
            Some(slot) => {
                state.order.remove(&slot.tick);
                slot.tick = tick;
                state.order.insert(tick, key.clone());
                state.hits += 1;
                trace!("Cache hit for '{}' {:?}", key.format_id, key.range);
                Some(slot.value.clone())
            }
            None => {
                state.misses += 1;
                trace!("Cache miss for '{}' {:?}", key.format_id, key.range);
                None
            }
        }
    }

    /// Store `value`, evicting the least recently used entries when full
    pub fn insert(&self, key: CacheKey, value: V) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.capacity == 0 {
            return;
        }
        state.tick += 1;
        let tick = state.tick;

        if let Some(slot) = state.entries.get_mut(&key) {
            state.order.remove(&slot.tick);
            slot.tick = tick;
            slot.value = value;
            state.order.insert(tick, key);
            return;
        }

        while state.entries.len() >= state.capacity {
            let Some((_, oldest)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            state.evictions += 1;
            trace!("Evicted '{}' {:?}", oldest.format_id, oldest.range);
        }
        state.order.insert(tick, key.clone());
        state.entries.insert(key, Slot { value, tick });
    }

    /// Whether `key` is cached, without touching its recency or the counters
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
            capacity: state.capacity,
        }
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ResultCache")
            .field("entries", &state.entries.len())
            .field("capacity", &state.capacity)
            .finish()
    }
}
