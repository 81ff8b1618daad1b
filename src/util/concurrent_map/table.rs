use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Shared};
use spin::Mutex;

use super::bin::{destroy_bin, BinEntry};

/// A bucket. The head is read without the lock. All writes to a non-empty bucket, and the
/// migration of the bucket during a resize, hold `lock`.
pub(super) struct Bin<K, V> {
    pub(super) head: Atomic<BinEntry<K, V>>,
    pub(super) lock: Mutex<()>,
}

pub(super) struct Table<K, V> {
    bins: Box<[Bin<K, V>]>,
    /// The table this one is being migrated into. Set before the first bucket is marked as moved,
    /// and never cleared.
    pub(super) next: Atomic<Table<K, V>>,
}

impl<K, V> Table<K, V> {
    pub(super) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Table {
            bins: (0..capacity)
                .map(|_| Bin {
                    head: Atomic::null(),
                    lock: Mutex::new(()),
                })
                .collect(),
            next: Atomic::null(),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.bins.len()
    }

    pub(super) fn index_for(&self, hash: u64) -> usize {
        (hash as usize) & (self.len() - 1)
    }

    pub(super) fn bin(&self, index: usize) -> &Bin<K, V> {
        &self.bins[index]
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // A table is dropped either with the map, or after a resize when every bucket holds a
        // moved entry. `next` belongs to the map, not to this table.
        for bin in self.bins.iter() {
            unsafe {
                let head = bin
                    .head
                    .swap(Shared::null(), Ordering::Relaxed, epoch::unprotected());
                destroy_bin(head);
            }
        }
    }
}
