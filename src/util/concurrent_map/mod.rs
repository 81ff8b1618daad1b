//! A concurrent hash map with lock-free reads, modelled after Java's `ConcurrentHashMap`.
//!
//! * The table is an array of buckets whose length is a power of two. A key is placed at
//!   `spread(hash) & (capacity - 1)`, where `spread(h) = h ^ (h >> 16)`.
//! * Reads never lock. A reader pins the epoch, loads the bucket head and scans the chain or the
//!   tree bin.
//! * A put into an empty bucket is a single compare-and-swap. Every other write takes the lock of
//!   that bucket only. There is no global lock.
//! * When the number of entries reaches `capacity * load_factor`, one thread doubles the table.
//!   Buckets are migrated one at a time under their lock. The entries of old bucket `i` are split
//!   into new buckets `i` and `i + old_capacity` by a single bit of the hash, and the old bucket
//!   is then replaced by a moved entry that forwards readers and writers to the new table.
//! * A chain that grows to `treeify_threshold` entries becomes a tree bin (ordered by hash), and
//!   turns back into a chain once it shrinks to `untreeify_threshold` entries.
//!
//! Memory of unlinked nodes, replaced values and retired tables is reclaimed through
//! `crossbeam::epoch`. Because reads return clones, keys and values must be `Clone`.

mod bin;
mod table;

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};

use self::bin::{build_chain, chain, defer_destroy_bin, BinEntry, Node, TreeBin};
use self::table::Table;
use crate::util::constants::*;
use crate::util::options::Options;

/// Values that can represent "null".
///
/// The map rejects null keys and values so that `Ok(None)` from a lookup always means that the key
/// is absent. Most types are never null and can use the default method.
pub trait Nullable {
    fn is_null(&self) -> bool {
        false
    }
}

macro_rules! never_null {
    ($($t:ty),* $(,)?) => {
        $(impl Nullable for $t {})*
    };
}

never_null!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char, (),
    str, String,
);

impl<T: Nullable + ?Sized> Nullable for &T {
    fn is_null(&self) -> bool {
        (**self).is_null()
    }
}

impl<T: ?Sized> Nullable for Box<T> {}
impl<T: ?Sized> Nullable for Arc<T> {}
impl<T: ?Sized> Nullable for Rc<T> {}
impl<T> Nullable for Vec<T> {}
impl<A, B> Nullable for (A, B) {}
impl<A, B, C> Nullable for (A, B, C) {}

impl<T> Nullable for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }
}

impl<T: ?Sized> Nullable for *const T {
    fn is_null(&self) -> bool {
        <*const T>::is_null(*self)
    }
}

impl<T: ?Sized> Nullable for *mut T {
    fn is_null(&self) -> bool {
        <*mut T>::is_null(*self)
    }
}

/// A null key or value was passed to the map. The map was not modified.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvalidArgument {
    NullKey,
    NullValue,
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidArgument::NullKey => write!(f, "null keys are not permitted"),
            InvalidArgument::NullValue => write!(f, "null values are not permitted"),
        }
    }
}

impl std::error::Error for InvalidArgument {}

/// Construction-time parameters of a [`ConcurrentMap`].
#[derive(Clone, Debug, PartialEq)]
pub struct MapConfig {
    /// Number of buckets of the first table. Rounded up to a power of two.
    pub initial_capacity: usize,
    pub load_factor: f64,
    pub treeify_threshold: usize,
    pub untreeify_threshold: usize,
    /// Tables with fewer buckets are doubled instead of treeifying a long chain.
    pub min_treeify_capacity: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            initial_capacity: DEFAULT_MAP_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            treeify_threshold: TREEIFY_THRESHOLD,
            untreeify_threshold: UNTREEIFY_THRESHOLD,
            min_treeify_capacity: MIN_TREEIFY_CAPACITY,
        }
    }
}

impl MapConfig {
    pub fn from_options(options: &Options) -> Self {
        let mut config = MapConfig {
            initial_capacity: options.map_initial_capacity,
            load_factor: options.map_load_factor,
            treeify_threshold: options.treeify_threshold,
            untreeify_threshold: options.untreeify_threshold,
            min_treeify_capacity: options.min_treeify_capacity,
        };
        if config.untreeify_threshold >= config.treeify_threshold {
            warn!(
                "untreeify_threshold ({}) must be below treeify_threshold ({}). Default thresholds will be used.",
                config.untreeify_threshold, config.treeify_threshold
            );
            config.treeify_threshold = TREEIFY_THRESHOLD;
            config.untreeify_threshold = UNTREEIFY_THRESHOLD;
        }
        config
    }

    fn table_capacity(&self) -> usize {
        self.initial_capacity
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(MAXIMUM_MAP_CAPACITY)
            .min(MAXIMUM_MAP_CAPACITY)
    }

    /// The size at which a table of `capacity` buckets is doubled.
    fn resize_threshold(&self, capacity: usize) -> isize {
        ((capacity as f64 * self.load_factor).ceil() as isize).max(1)
    }
}

fn spread(hash: u64) -> u64 {
    hash ^ (hash >> 16)
}

/// A thread-safe hash map. See the [module documentation](self) for the design.
pub struct ConcurrentMap<K, V, S = RandomState> {
    table: Atomic<Table<K, V>>,
    /// Best-effort entry count. It may be briefly off by the number of in-flight writes.
    count: AtomicIsize,
    /// Set while a thread migrates the table. Only that thread writes the new table's buckets
    /// before they are reachable through a moved entry.
    resizing: AtomicBool,
    config: MapConfig,
    build_hasher: S,
}

impl<K, V> ConcurrentMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Nullable + Send + Sync + 'static,
    V: Clone + Nullable + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(MapConfig {
            initial_capacity: capacity,
            ..MapConfig::default()
        })
    }

    pub fn with_config(config: MapConfig) -> Self {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<K, V> Default for ConcurrentMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Nullable + Send + Sync + 'static,
    V: Clone + Nullable + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Hash + Eq + Clone + Nullable + Send + Sync + 'static,
    V: Clone + Nullable + Send + Sync + 'static,
    S: BuildHasher,
{
    pub fn with_config_and_hasher(config: MapConfig, build_hasher: S) -> Self {
        let capacity = config.table_capacity();
        ConcurrentMap {
            table: Atomic::new(Table::new(capacity)),
            count: AtomicIsize::new(0),
            resizing: AtomicBool::new(false),
            config,
            build_hasher,
        }
    }

    fn hash(&self, key: &K) -> u64 {
        spread(self.build_hasher.hash_one(key))
    }

    /// The number of entries. Concurrent writers may make this briefly stale.
    pub fn size(&self) -> usize {
        self.count.load(Ordering::SeqCst).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The number of buckets of the current table.
    pub fn capacity(&self) -> usize {
        let guard = &epoch::pin();
        // SAFETY: the table is never null, and retired tables are reclaimed through the epoch.
        unsafe { self.table.load(Ordering::Acquire, guard).deref() }.len()
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Look up `key`. This never blocks.
    pub fn get(&self, key: &K) -> Result<Option<V>, InvalidArgument> {
        if key.is_null() {
            return Err(InvalidArgument::NullKey);
        }
        let hash = self.hash(key);
        let guard = &epoch::pin();
        let mut table = self.table.load(Ordering::Acquire, guard);
        loop {
            // SAFETY: tables are reclaimed through the epoch, and a moved bucket implies that
            // `next` was set.
            let t = unsafe { table.deref() };
            let head = t.bin(t.index_for(hash)).head.load(Ordering::Acquire, guard);
            // SAFETY: bin entries are reclaimed through the epoch.
            let found = match unsafe { head.as_ref() } {
                None => None,
                Some(BinEntry::Moved) => {
                    table = t.next.load(Ordering::Acquire, guard);
                    continue;
                }
                Some(BinEntry::Node(_)) => chain(head, guard)
                    .find(|node| node.hash == hash && node.key == *key)
                    .map(|node| node.load_value(guard).clone()),
                Some(BinEntry::Tree(tree)) => tree.get(hash, key, guard).cloned(),
            };
            return Ok(found);
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, InvalidArgument> {
        self.get(key).map(|value| value.is_some())
    }

    /// Map `key` to `value`. Returns the previous value.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>, InvalidArgument> {
        Self::check(&key, &value)?;
        Ok(self.put_val(key, value, false))
    }

    /// Map `key` to `value` unless the key is present. Returns the present value, if any.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, InvalidArgument> {
        Self::check(&key, &value)?;
        Ok(self.put_val(key, value, true))
    }

    /// Remove `key`. Returns the removed value.
    pub fn remove(&self, key: &K) -> Result<Option<V>, InvalidArgument> {
        if key.is_null() {
            return Err(InvalidArgument::NullKey);
        }
        Ok(self.replace_node(key, |_| None).map(|(old, _)| old))
    }

    /// Atomically replace the value of a present key by `remap(old)`. The closure runs at most once,
    /// while the bucket is locked. If it returns `None` (or a null value) the entry is removed.
    /// Returns the new value.
    pub fn compute_if_present<F>(&self, key: &K, remap: F) -> Result<Option<V>, InvalidArgument>
    where
        F: FnOnce(&V) -> Option<V>,
    {
        if key.is_null() {
            return Err(InvalidArgument::NullKey);
        }
        Ok(self.replace_node(key, remap).and_then(|(_, new)| new))
    }

    fn check(key: &K, value: &V) -> Result<(), InvalidArgument> {
        if key.is_null() {
            Err(InvalidArgument::NullKey)
        } else if value.is_null() {
            Err(InvalidArgument::NullValue)
        } else {
            Ok(())
        }
    }

    fn put_val(&self, key: K, value: V, only_if_absent: bool) -> Option<V> {
        let hash = self.hash(&key);
        let guard = &epoch::pin();
        let mut table = self.table.load(Ordering::Acquire, guard);
        let mut key = key;
        let mut value = value;
        loop {
            // SAFETY: see `get()`.
            let t = unsafe { table.deref() };
            let index = t.index_for(hash);
            let bin = t.bin(index);
            let head = bin.head.load(Ordering::Acquire, guard);

            if head.is_null() {
                let node = Owned::new(BinEntry::Node(Node::new(hash, key, value)));
                match bin.head.compare_exchange(
                    Shared::null(),
                    node,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(_) => {
                        trace!("claimed empty bucket {}", index);
                        self.add_count(1, guard);
                        return None;
                    }
                    Err(err) => {
                        // Another writer filled the bucket first.
                        (key, value) = match *err.new.into_box() {
                            BinEntry::Node(node) => node.into_parts(),
                            _ => unreachable!(),
                        };
                        continue;
                    }
                }
            }
            // SAFETY: see `get()`.
            if let BinEntry::Moved = unsafe { head.deref() } {
                table = t.next.load(Ordering::Acquire, guard);
                continue;
            }

            let lock = bin.lock.lock();
            // The head may have changed while we were waiting for the lock.
            let head = bin.head.load(Ordering::Acquire, guard);
            // SAFETY: see `get()`.
            match unsafe { head.as_ref() } {
                None | Some(BinEntry::Moved) => {
                    drop(lock);
                    continue;
                }
                Some(BinEntry::Node(_)) => {
                    let mut bin_count = 0;
                    let mut last = None;
                    for node in chain(head, guard) {
                        bin_count += 1;
                        if node.hash == hash && node.key == key {
                            let present = node.load_value(guard).clone();
                            if !only_if_absent {
                                let old = node.value.swap(
                                    Owned::new(value),
                                    Ordering::AcqRel,
                                    guard,
                                );
                                // SAFETY: the old value is no longer reachable from the node.
                                unsafe { guard.defer_destroy(old) };
                            }
                            return Some(present);
                        }
                        last = Some(node);
                    }
                    let Some(last) = last else {
                        unreachable!("a chain head is a node")
                    };
                    last.next.store(
                        Owned::new(BinEntry::Node(Node::new(hash, key, value))),
                        Ordering::Release,
                    );
                    drop(lock);
                    if bin_count + 1 >= self.config.treeify_threshold {
                        self.treeify_bin(table, index, guard);
                    }
                    self.add_count(1, guard);
                    return None;
                }
                Some(BinEntry::Tree(tree)) => {
                    if let Some(present) = tree.get(hash, &key, guard) {
                        let present = present.clone();
                        if !only_if_absent {
                            tree.swap_value(hash, &key, value, guard);
                        }
                        return Some(present);
                    }
                    let mut tree = tree.copy(guard);
                    tree.insert(hash, key, value);
                    bin.head
                        .store(Owned::new(BinEntry::Tree(tree)), Ordering::Release);
                    // SAFETY: the old tree bin was just unlinked.
                    unsafe { guard.defer_destroy(head) };
                    drop(lock);
                    self.add_count(1, guard);
                    return None;
                }
            }
        }
    }

    /// Find `key` and replace its value by `remap(old)`, or remove the entry if that is `None`.
    /// Returns the old value and the new value.
    fn replace_node<F>(&self, key: &K, remap: F) -> Option<(V, Option<V>)>
    where
        F: FnOnce(&V) -> Option<V>,
    {
        let hash = self.hash(key);
        let guard = &epoch::pin();
        let mut table = self.table.load(Ordering::Acquire, guard);
        loop {
            // SAFETY: see `get()`.
            let t = unsafe { table.deref() };
            let bin = t.bin(t.index_for(hash));
            let head = bin.head.load(Ordering::Acquire, guard);
            // SAFETY: see `get()`.
            match unsafe { head.as_ref() } {
                None => return None,
                Some(BinEntry::Moved) => {
                    table = t.next.load(Ordering::Acquire, guard);
                    continue;
                }
                Some(_) => {}
            }

            let lock = bin.lock.lock();
            let head = bin.head.load(Ordering::Acquire, guard);
            // SAFETY: see `get()`.
            match unsafe { head.as_ref() } {
                None => return None,
                Some(BinEntry::Moved) => {
                    drop(lock);
                    continue;
                }
                Some(BinEntry::Node(_)) => {
                    let mut prev = &bin.head;
                    let mut cur = head;
                    // SAFETY: see `get()`.
                    while let Some(node) = unsafe { cur.as_ref() }.and_then(BinEntry::as_node) {
                        let next = node.next.load(Ordering::Acquire, guard);
                        if node.hash == hash && node.key == *key {
                            let old = node.load_value(guard).clone();
                            return match remap(&old).filter(|new| !new.is_null()) {
                                Some(new) => {
                                    let replaced = node.value.swap(
                                        Owned::new(new.clone()),
                                        Ordering::AcqRel,
                                        guard,
                                    );
                                    // SAFETY: the replaced value is no longer reachable.
                                    unsafe { guard.defer_destroy(replaced) };
                                    Some((old, Some(new)))
                                }
                                None => {
                                    prev.store(next, Ordering::Release);
                                    // SAFETY: the node was just unlinked. Its `next` stays
                                    // valid for readers that are still on this node.
                                    unsafe { guard.defer_destroy(cur) };
                                    drop(lock);
                                    self.count.fetch_sub(1, Ordering::SeqCst);
                                    Some((old, None))
                                }
                            };
                        }
                        prev = &node.next;
                        cur = next;
                    }
                    return None;
                }
                Some(BinEntry::Tree(tree)) => {
                    let old = tree.get(hash, key, guard)?.clone();
                    return match remap(&old).filter(|new| !new.is_null()) {
                        Some(new) => {
                            tree.swap_value(hash, key, new.clone(), guard);
                            Some((old, Some(new)))
                        }
                        None => {
                            let mut tree = tree.copy(guard);
                            tree.remove(hash, key);
                            let replacement = if tree.len() > self.config.untreeify_threshold {
                                Atomic::new(BinEntry::Tree(tree))
                            } else {
                                build_chain(tree.into_entries())
                            };
                            bin.head.store(
                                replacement.load(Ordering::Relaxed, guard),
                                Ordering::Release,
                            );
                            // SAFETY: the old tree bin was just unlinked.
                            unsafe { guard.defer_destroy(head) };
                            drop(lock);
                            self.count.fetch_sub(1, Ordering::SeqCst);
                            Some((old, None))
                        }
                    };
                }
            }
        }
    }

    /// Build the bin for half of a split tree bin: a tree if it is still large, otherwise a chain.
    fn make_tree_half(&self, entries: Vec<(u64, K, V)>) -> Atomic<BinEntry<K, V>> {
        if entries.len() > self.config.untreeify_threshold {
            Atomic::new(BinEntry::Tree(TreeBin::from_entries(entries)))
        } else {
            build_chain(entries)
        }
    }

    /// Replace a long chain by a tree bin, or double a table that is still small.
    fn treeify_bin<'g>(&self, table: Shared<'g, Table<K, V>>, index: usize, guard: &'g Guard) {
        // SAFETY: see `get()`.
        let t = unsafe { table.deref() };
        if t.len() < self.config.min_treeify_capacity {
            debug!(
                "bucket {} reached {} entries in a table of {}, resizing instead of treeifying",
                index,
                self.config.treeify_threshold,
                t.len()
            );
            self.try_resize(Some(table), guard);
            return;
        }
        let bin = t.bin(index);
        let _lock = bin.lock.lock();
        let head = bin.head.load(Ordering::Acquire, guard);
        // SAFETY: see `get()`.
        if let Some(BinEntry::Node(_)) = unsafe { head.as_ref() } {
            let entries: Vec<_> = chain(head, guard)
                .map(|node| (node.hash, node.key.clone(), node.load_value(guard).clone()))
                .collect();
            if entries.len() >= self.config.treeify_threshold {
                trace!("treeifying bucket {} with {} entries", index, entries.len());
                bin.head.store(
                    Owned::new(BinEntry::Tree(TreeBin::from_entries(entries))),
                    Ordering::Release,
                );
                // SAFETY: the chain was just unlinked.
                unsafe { defer_destroy_bin(head, guard) };
            }
        }
    }

    fn add_count(&self, delta: isize, guard: &Guard) {
        let count = self.count.fetch_add(delta, Ordering::SeqCst) + delta;
        let table = self.table.load(Ordering::Acquire, guard);
        // SAFETY: see `get()`.
        let capacity = unsafe { table.deref() }.len();
        if count >= self.config.resize_threshold(capacity) {
            self.try_resize(None, guard);
        }
    }

    /// Double the table now, unless another thread is already resizing it.
    pub fn resize(&self) {
        let guard = &epoch::pin();
        let table = self.table.load(Ordering::Acquire, guard);
        self.try_resize(Some(table), guard);
    }

    /// With `expected`, double that table once if it is still current. Without it, keep doubling
    /// while the map is above its load factor.
    fn try_resize<'g>(&self, expected: Option<Shared<'g, Table<K, V>>>, guard: &'g Guard) {
        loop {
            let table = self.table.load(Ordering::Acquire, guard);
            // SAFETY: see `get()`.
            let capacity = unsafe { table.deref() }.len();
            if capacity >= MAXIMUM_MAP_CAPACITY {
                return;
            }
            match expected {
                Some(expected) if expected != table => return,
                Some(_) => {}
                None => {
                    if self.count.load(Ordering::SeqCst) < self.config.resize_threshold(capacity)
                    {
                        return;
                    }
                }
            }
            if self
                .resizing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                // Somebody else is migrating. Our entry lands in the new table either way.
                return;
            }
            if self.table.load(Ordering::Acquire, guard) == table {
                self.transfer(table, guard);
            }
            self.resizing.store(false, Ordering::Release);
            if expected.is_some() {
                return;
            }
        }
    }

    /// Migrate every bucket of `table` into a table twice as large, then publish it. The caller
    /// holds the `resizing` flag.
    fn transfer<'g>(&self, table: Shared<'g, Table<K, V>>, guard: &'g Guard) {
        // SAFETY: see `get()`.
        let t = unsafe { table.deref() };
        let n = t.len();
        let next = Owned::new(Table::new(n << 1)).into_shared(guard);
        t.next.store(next, Ordering::Release);
        // SAFETY: just allocated.
        let nt = unsafe { next.deref() };
        debug!("resizing table from {} to {} buckets", n, n << 1);

        for index in (0..n).rev() {
            let bin = t.bin(index);
            loop {
                let head = bin.head.load(Ordering::Acquire, guard);
                if head.is_null() {
                    // An empty bucket is forwarded without locking. This races only with a
                    // writer claiming the bucket, and then we retry under the lock.
                    if bin
                        .head
                        .compare_exchange(
                            Shared::null(),
                            Owned::new(BinEntry::Moved),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_ok()
                    {
                        break;
                    }
                    continue;
                }

                let _lock = bin.lock.lock();
                let head = bin.head.load(Ordering::Acquire, guard);
                // SAFETY: see `get()`.
                let (lo, hi) = match unsafe { head.as_ref() } {
                    None => continue,
                    Some(BinEntry::Moved) => unreachable!("bucket {} migrated twice", index),
                    Some(BinEntry::Node(_)) => {
                        let (lo, hi): (Vec<_>, Vec<_>) = chain(head, guard)
                            .map(|node| {
                                (node.hash, node.key.clone(), node.load_value(guard).clone())
                            })
                            .partition(|(hash, _, _)| (*hash as usize) & n == 0);
                        (build_chain(lo), build_chain(hi))
                    }
                    Some(BinEntry::Tree(tree)) => {
                        let (lo, hi): (Vec<_>, Vec<_>) = tree
                            .iter(guard)
                            .map(|(hash, key, value)| (hash, key.clone(), value.clone()))
                            .partition(|(hash, _, _)| (*hash as usize) & n == 0);
                        (self.make_tree_half(lo), self.make_tree_half(hi))
                    }
                };
                // Nobody can reach the new buckets before the old one is marked as moved.
                nt.bin(index)
                    .head
                    .store(lo.load(Ordering::Relaxed, guard), Ordering::Release);
                nt.bin(index + n)
                    .head
                    .store(hi.load(Ordering::Relaxed, guard), Ordering::Release);
                bin.head
                    .store(Owned::new(BinEntry::Moved), Ordering::Release);
                // SAFETY: the old entries were just unlinked, and copies live in `nt`.
                unsafe { defer_destroy_bin(head, guard) };
                break;
            }
        }

        #[cfg(feature = "extreme_assertions")]
        self.verify_table(nt, guard);

        self.table.store(next, Ordering::Release);
        // SAFETY: every bucket of the old table is a moved entry. Threads still holding it are
        // pinned.
        unsafe { guard.defer_destroy(table) };
    }

    #[cfg(feature = "extreme_assertions")]
    fn verify_table(&self, t: &Table<K, V>, guard: &Guard) {
        for index in 0..t.len() {
            let head = t.bin(index).head.load(Ordering::Acquire, guard);
            match unsafe { head.as_ref() } {
                Some(BinEntry::Node(_)) => {
                    for node in chain(head, guard) {
                        assert_eq!(t.index_for(node.hash), index);
                    }
                }
                Some(BinEntry::Tree(tree)) => {
                    for (hash, _, _) in tree.iter(guard) {
                        assert_eq!(t.index_for(hash), index);
                    }
                }
                Some(BinEntry::Moved) => panic!("fresh table has a moved bucket {}", index),
                None => {}
            }
        }
    }

    /// Call `f` for every entry. The traversal is weakly consistent: it sees every entry that is
    /// present for the whole traversal, and may or may not see concurrent changes.
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        let guard = &epoch::pin();
        // SAFETY: see `get()`.
        let t = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        for index in 0..t.len() {
            Self::visit_bin(t, index, &mut f, guard);
        }
    }

    fn visit_bin<'g, F: FnMut(&K, &V)>(
        t: &'g Table<K, V>,
        index: usize,
        f: &mut F,
        guard: &'g Guard,
    ) {
        let head = t.bin(index).head.load(Ordering::Acquire, guard);
        // SAFETY: see `get()`.
        match unsafe { head.as_ref() } {
            None => {}
            Some(BinEntry::Moved) => {
                // SAFETY: see `get()`.
                let next = unsafe { t.next.load(Ordering::Acquire, guard).deref() };
                Self::visit_bin(next, index, f, guard);
                Self::visit_bin(next, index + t.len(), f, guard);
            }
            Some(BinEntry::Node(_)) => {
                for node in chain(head, guard) {
                    f(&node.key, node.load_value(guard));
                }
            }
            Some(BinEntry::Tree(tree)) => {
                for (_, key, value) in tree.iter(guard) {
                    f(key, value);
                }
            }
        }
    }

    /// A snapshot of the keys.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.size());
        self.for_each(|key, _| keys.push(key.clone()));
        keys
    }

    /// Remove every entry, one bucket at a time.
    pub fn clear(&self) {
        let guard = &epoch::pin();
        // SAFETY: see `get()`.
        let t = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        for index in 0..t.len() {
            self.clear_bin(t, index, guard);
        }
    }

    fn clear_bin<'g>(&self, t: &'g Table<K, V>, index: usize, guard: &'g Guard) {
        let bin = t.bin(index);
        let lock = bin.lock.lock();
        let head = bin.head.load(Ordering::Acquire, guard);
        // SAFETY: see `get()`.
        let removed = match unsafe { head.as_ref() } {
            None => return,
            Some(BinEntry::Moved) => {
                drop(lock);
                // SAFETY: see `get()`.
                let next = unsafe { t.next.load(Ordering::Acquire, guard).deref() };
                self.clear_bin(next, index, guard);
                self.clear_bin(next, index + t.len(), guard);
                return;
            }
            Some(BinEntry::Node(_)) => chain(head, guard).count(),
            Some(BinEntry::Tree(tree)) => tree.len(),
        };
        bin.head.store(Shared::null(), Ordering::Release);
        // SAFETY: the bin was just unlinked.
        unsafe { defer_destroy_bin(head, guard) };
        drop(lock);
        self.count.fetch_sub(removed as isize, Ordering::SeqCst);
    }
}

impl<K, V, S> fmt::Debug for ConcurrentMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish()
    }
}

impl<K, V, S> Drop for ConcurrentMap<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees that no other thread is using the map, so the current
        // table can be dropped right away.
        unsafe {
            let table = self
                .table
                .swap(Shared::null(), Ordering::Relaxed, epoch::unprotected());
            if !table.is_null() {
                drop(table.into_owned());
            }
        }
    }
}
