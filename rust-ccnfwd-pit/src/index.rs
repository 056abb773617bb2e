//! Byte-keyed index from PIT keys to entries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::entry::PitEntry;
use crate::error::{PitError, Result};

/// Outcome of publishing a new entry.
#[derive(Debug)]
pub enum Publish {
    /// The entry is now reachable under its key.
    Inserted,
    /// Another entry won the race for the key.
    Existing(Arc<PitEntry>),
}

/// Concurrent map the PIT stores its entries in.
///
/// Implementations provide their own synchronisation; the PIT calls them
/// from any thread without further locking.
pub trait EntryIndex: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Arc<PitEntry>>;

    /// Makes `entry` reachable under its own key unless the key is taken.
    fn publish(&self, entry: Arc<PitEntry>) -> Result<Publish>;

    fn remove(&self, key: &[u8]) -> Option<Arc<PitEntry>>;

    /// Removes `entry` only if it is still the one stored under its key.
    fn remove_entry(&self, entry: &Arc<PitEntry>) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Point-in-time copy of all entries, for sweeps.
    fn snapshot(&self) -> Vec<Arc<PitEntry>>;
}

/// Bounded [`EntryIndex`] on top of a sharded `DashMap`.
///
/// The bound is hard: a slot is reserved in `len` while the key's shard is
/// held, so concurrent publishers can never push the map past `capacity`.
#[derive(Debug)]
pub struct DashIndex {
    map: DashMap<Bytes, Arc<PitEntry>>,
    len: AtomicUsize,
    capacity: usize,
}

impl DashIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity(capacity.min(4096)),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn reserve(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then(|| n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.len.fetch_sub(1, Ordering::AcqRel);
    }
}

impl EntryIndex for DashIndex {
    fn get(&self, key: &[u8]) -> Option<Arc<PitEntry>> {
        self.map.get(key).map(|e| Arc::clone(e.value()))
    }

    fn publish(&self, entry: Arc<PitEntry>) -> Result<Publish> {
        match self.map.entry(entry.key().clone()) {
            Entry::Occupied(existing) => Ok(Publish::Existing(Arc::clone(existing.get()))),
            Entry::Vacant(slot) => {
                if !self.reserve() {
                    return Err(PitError::IndexFull {
                        capacity: self.capacity,
                    });
                }
                slot.insert(entry);
                Ok(Publish::Inserted)
            }
        }
    }

    fn remove(&self, key: &[u8]) -> Option<Arc<PitEntry>> {
        let removed = self.map.remove(key).map(|(_, entry)| entry);
        if removed.is_some() {
            self.release();
        }
        removed
    }

    fn remove_entry(&self, entry: &Arc<PitEntry>) -> bool {
        let removed = self
            .map
            .remove_if(&entry.key()[..], |_, stored| Arc::ptr_eq(stored, entry))
            .is_some();
        if removed {
            self.release();
        }
        removed
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn snapshot(&self) -> Vec<Arc<PitEntry>> {
        self.map.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
