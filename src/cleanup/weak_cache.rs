//! Weakly-keyed association cache
//!
//! Maps an `Arc<K>` key to a strongly held value. Lookups go through `K`'s
//! `Hash` and `Eq`, so a separately allocated but equal key finds the entry.
//! Holding an entry never keeps its key alive: each insert registers a cleanup
//! ticket on the key it was given, and the ticket's action evicts the entry
//! once that key is reclaimed.
//!
//! Keys pinned by a process-wide pool (a `static` interner, for example) never
//! become unreachable, so their entries are never evicted. That is expected
//! behavior, not a leak in the cache.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use super::action::CleanupAction;
use super::registry::CleanupRegistry;
use super::ticket::{CleanupTicket, TicketId};
use crate::error::CleanupResult;

/// Hash of a key under the cache's hasher; entries with equal hashes share a bucket
type KeyHash = u64;

struct CacheEntry<K, V> {
    key: Weak<K>,
    value: V,
    ticket: CleanupTicket,
}

impl<K: Eq, V> CacheEntry<K, V> {
    /// Whether this entry's key is still alive and equal to `key`
    fn matches(&self, key: &K) -> bool {
        self.key.upgrade().is_some_and(|live| *live == *key)
    }
}

struct CacheShared<K, V> {
    buckets: DashMap<KeyHash, Vec<CacheEntry<K, V>>>,
    total_insertions: AtomicUsize,
    total_reclaimed: AtomicUsize,
    total_explicit_deletions: AtomicUsize,
}

impl<K, V> CacheShared<K, V> {
    /// Reclamation eviction; only removes the entry owned by `ticket`
    fn evict(&self, hash: KeyHash, ticket: TicketId) {
        let evicted = self.buckets.get_mut(&hash).and_then(|mut bucket| {
            let index = bucket.iter().position(|entry| entry.ticket.id() == ticket)?;
            Some(bucket.swap_remove(index))
        });
        if evicted.is_some() {
            self.total_reclaimed.fetch_add(1, Ordering::Relaxed);
            self.buckets.remove_if(&hash, |_, bucket| bucket.is_empty());
        }
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }
}

/// Weakly-keyed map from `Arc<K>` to `V`, matching keys by equality.
///
/// `size` is advisory: after a key is dropped its entry stays counted until
/// the reclamation notification has been processed.
///
/// The entry is watched through the key passed to the `put` that created it.
/// A later `put` with an equal key replaces the value but keeps that watch, so
/// the entry is evicted once the original key is reclaimed.
///
/// # Examples
///
/// ```
/// use reclaim::{CleanupRegistry, RegistryConfig, WeakAssociationCache};
/// use std::sync::Arc;
///
/// let registry = Arc::new(CleanupRegistry::new(RegistryConfig::default()).unwrap());
/// let cache = WeakAssociationCache::new(Arc::clone(&registry));
///
/// let session = Arc::new(String::from("session-1"));
/// cache.put(&session, 42u32).unwrap();
/// assert_eq!(cache.get(&String::from("session-1")), Some(42));
///
/// assert_eq!(cache.remove(&session), Some(42));
/// assert_eq!(cache.get(&session), None);
/// ```
pub struct WeakAssociationCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    shared: Arc<CacheShared<K, V>>,
    registry: Arc<CleanupRegistry>,
    hasher: RandomState,
}

impl<K, V> WeakAssociationCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache whose evictions are driven by `registry`
    pub fn new(registry: Arc<CleanupRegistry>) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                buckets: DashMap::new(),
                total_insertions: AtomicUsize::new(0),
                total_reclaimed: AtomicUsize::new(0),
                total_explicit_deletions: AtomicUsize::new(0),
            }),
            registry,
            hasher: RandomState::new(),
        }
    }

    fn hash(&self, key: &K) -> KeyHash {
        self.hasher.hash_one(key)
    }

    /// Associate `value` with `key`.
    ///
    /// Returns the previous value when an equal live key was already present;
    /// the existing watch is kept in that case.
    pub fn put(&self, key: &Arc<K>, value: V) -> CleanupResult<Option<V>> {
        let hash = self.hash(key);
        let mut bucket = self.shared.buckets.entry(hash).or_default();
        if let Some(entry) = bucket.iter_mut().find(|entry| entry.matches(key)) {
            return Ok(Some(mem::replace(&mut entry.value, value)));
        }

        let shared = Arc::downgrade(&self.shared);
        let slot: Arc<OnceCell<TicketId>> = Arc::new(OnceCell::new());
        let slot_in = Arc::clone(&slot);
        let registered = self.registry.register(
            key,
            CleanupAction::new(move || {
                if let (Some(shared), Some(ticket)) = (shared.upgrade(), slot_in.get()) {
                    shared.evict(hash, *ticket);
                }
            }),
        );
        let ticket = match registered {
            Ok(ticket) => ticket,
            Err(error) => {
                let empty = bucket.is_empty();
                drop(bucket);
                if empty {
                    self.shared.buckets.remove_if(&hash, |_, bucket| bucket.is_empty());
                }
                return Err(error);
            }
        };
        let _ = slot.set(ticket.id());

        bucket.push(CacheEntry {
            key: Arc::downgrade(key),
            value,
            ticket,
        });
        self.shared.total_insertions.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Value associated with a key equal to `key`, if present
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let bucket = self.shared.buckets.get(&self.hash(key))?;
        bucket
            .iter()
            .find(|entry| entry.matches(key))
            .map(|entry| entry.value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared
            .buckets
            .get(&self.hash(key))
            .is_some_and(|bucket| bucket.iter().any(|entry| entry.matches(key)))
    }

    /// Delete the entry for `key` and release its watch
    pub fn remove(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);
        let entry = {
            let mut bucket = self.shared.buckets.get_mut(&hash)?;
            let index = bucket.iter().position(|entry| entry.matches(key))?;
            bucket.swap_remove(index)
        };
        self.shared.buckets.remove_if(&hash, |_, bucket| bucket.is_empty());
        self.shared
            .total_explicit_deletions
            .fetch_add(1, Ordering::Relaxed);
        // The entry is already gone, so the action finds nothing to evict
        let _ = entry.ticket.trigger();
        Some(entry.value)
    }
}

impl<K, V> WeakAssociationCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Number of entries, including ones whose key was reclaimed but whose
    /// notification has not been processed yet
    pub fn size(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Live keys currently in the cache
    pub fn keys_alive(&self) -> Vec<Arc<K>> {
        self.shared
            .buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|entry| entry.key.upgrade())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Delete every entry and release their watches
    pub fn clear(&self) {
        let removed = self.release_all();
        self.shared
            .total_explicit_deletions
            .fetch_add(removed, Ordering::Relaxed);
    }

    fn release_all(&self) -> usize {
        let hashes: Vec<KeyHash> = self.shared.buckets.iter().map(|bucket| *bucket.key()).collect();
        let mut removed = 0;
        for hash in hashes {
            if let Some((_, bucket)) = self.shared.buckets.remove(&hash) {
                for entry in bucket {
                    let _ = entry.ticket.trigger();
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Get statistics for this cache
    pub fn stats(&self) -> WeakCacheStats {
        WeakCacheStats {
            current_size: self.size(),
            total_insertions: self.shared.total_insertions.load(Ordering::Relaxed),
            total_reclaimed: self.shared.total_reclaimed.load(Ordering::Relaxed),
            total_explicit_deletions: self
                .shared
                .total_explicit_deletions
                .load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Drop for WeakAssociationCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<K, V> std::fmt::Debug for WeakAssociationCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakAssociationCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics for a weak association cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakCacheStats {
    /// Entries currently stored
    pub current_size: usize,
    /// Entries ever inserted
    pub total_insertions: usize,
    /// Entries evicted because their key was reclaimed
    pub total_reclaimed: usize,
    /// Entries removed by `remove` or `clear`
    pub total_explicit_deletions: usize,
}
