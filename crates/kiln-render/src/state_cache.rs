//! Generic caches for compiled backend state objects.
//!
//! Compiling a state descriptor into a backend object (a depth-stencil state,
//! a pipeline, an encoder) is expensive, and downstream code wants to compare
//! states by identity instead of by value. [`StateCache`] maps a descriptor to
//! one shared `Arc` per distinct value. [`StateTracker`] remembers the last
//! applied value of a piece of state so a setter can skip redundant calls.

use ahash::HashMap;
use kiln_core::profiling::profile_function;
use parking_lot::RwLock;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// How many entries a [`StateCache`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// Insert only. Entries live until [`StateCache::clear`].
    #[default]
    Unbounded,
    /// Keep at most `capacity` entries, evicting the least recently used one
    /// when a new key arrives at a full cache.
    Lru { capacity: usize },
}

struct CacheEntry<V> {
    value: Arc<V>,
    last_used: AtomicU64,
}

type Creator<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// A thread-safe descriptor-to-object cache.
///
/// The creator closure runs exactly once per distinct key for as long as that
/// key stays cached, so equal keys yield the same `Arc` and callers can use
/// [`Arc::ptr_eq`] as an equality check. Eviction and [`clear`](Self::clear)
/// drop only the cache's reference; handles held elsewhere stay valid.
///
/// # Example
///
/// ```
/// use kiln_render::state_cache::{CachePolicy, StateCache};
/// use std::sync::Arc;
///
/// let cache = StateCache::new(CachePolicy::Unbounded, |key: &u32| key * 2);
///
/// let a = cache.get_or_create_state(&21);
/// let b = cache.get_or_create_state(&21);
/// assert_eq!(*a, 42);
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct StateCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    creator: Creator<K, V>,
    policy: CachePolicy,
    clock: AtomicU64,
}

impl<K, V> StateCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache that builds missing entries with `creator`.
    pub fn new(policy: CachePolicy, creator: impl Fn(&K) -> V + Send + Sync + 'static) -> Self {
        if let CachePolicy::Lru { capacity: 0 } = policy {
            tracing::warn!("LRU state cache created with capacity 0; every lookup will recreate its entry");
        }

        Self {
            entries: RwLock::new(HashMap::default()),
            creator: Box::new(creator),
            policy,
            clock: AtomicU64::new(0),
        }
    }

    /// Get the object for `key`, creating it on a miss.
    pub fn get_or_create_state(&self, key: &K) -> Arc<V> {
        profile_function!();
        // Fast path under the read lock
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                return Arc::clone(&entry.value);
            }
        }

        let mut entries = self.entries.write();

        // Another thread may have inserted while we waited for the write lock
        if let Some(entry) = entries.get(key) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&entry.value);
        }

        let value = Arc::new((self.creator)(key));

        match self.policy {
            CachePolicy::Unbounded => {}
            CachePolicy::Lru { capacity: 0 } => return value,
            CachePolicy::Lru { capacity } => {
                if entries.len() >= capacity {
                    Self::evict_one(&mut entries);
                }
            }
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        value
    }

    /// Get the cached object for `key` without creating it.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.read();
        entries.get(key).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.value)
        })
    }

    /// Whether `key` is currently cached.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_one(entries: &mut HashMap<K, CacheEntry<V>>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            entries.remove(&key);
            tracing::debug!("state cache full, evicted least recently used entry");
        }
    }
}

/// Last-applied value of one piece of state plus a dirty flag.
///
/// A new tracker is dirty, so the first [`state_changed`](Self::state_changed)
/// reports a change even when the requested value equals the default.
#[derive(Debug, Clone)]
pub struct StateTracker<T> {
    current: T,
    dirty: bool,
}

impl<T: Default> Default for StateTracker<T> {
    fn default() -> Self {
        Self {
            current: T::default(),
            dirty: true,
        }
    }
}

impl<T: PartialEq> StateTracker<T> {
    /// Create a dirty tracker holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            current: initial,
            dirty: true,
        }
    }

    /// Force the next [`state_changed`](Self::state_changed) to report a change.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Record `state`, marking the tracker dirty if it differs from the current value.
    pub fn update_state(&mut self, state: T) {
        if self.current != state {
            self.current = state;
            self.dirty = true;
        }
    }

    /// Report and reset the dirty flag.
    pub fn state_changed(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn state(&self) -> &T {
        &self.current
    }
}
