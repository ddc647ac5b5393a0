//! Singleflight for collapsing concurrent loads of the same key.

use std::hash::Hash;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to acquire a singleflight slot.
pub enum SingleflightSlot<V> {
    /// We won the race and should execute the operation.
    /// Contains the sender to broadcast the result.
    Leader(broadcast::Sender<V>),
    /// Another task is executing; wait for its result.
    Follower(broadcast::Receiver<V>),
}

/// Deduplicates concurrent operations keyed by `K`.
///
/// When several callers ask for the same key at once, only the first one
/// (the leader) runs the operation; the rest subscribe to its result.
pub struct Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    in_flight: DashMap<K, broadcast::Sender<V>>,
}

impl<K, V> Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically registers as leader for `key`, or subscribes to the
    /// current leader.
    pub fn acquire(&self, key: K) -> SingleflightSlot<V> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => SingleflightSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                SingleflightSlot::Leader(tx)
            }
        }
    }

    /// Removes a completed in-flight entry.
    pub fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight entry on drop, so a leader that is cancelled or
/// panics does not leave followers subscribed forever.
pub struct SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    singleflight: &'a Singleflight<K, V>,
    key: K,
    completed: bool,
}

impl<'a, K, V> SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(singleflight: &'a Singleflight<K, V>, key: K) -> Self {
        Self {
            singleflight,
            key,
            completed: false,
        }
    }

    pub fn complete(mut self) {
        self.singleflight.complete(&self.key);
        self.completed = true;
    }
}

impl<K, V> Drop for SingleflightGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.completed {
            self.singleflight.complete(&self.key);
        }
    }
}
