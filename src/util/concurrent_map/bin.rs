use std::collections::BTreeMap;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};

/// The content of a bucket.
pub(super) enum BinEntry<K, V> {
    /// The head of a singly-linked chain.
    Node(Node<K, V>),
    /// A sorted bin used once a chain grows too long. It is immutable once published: writers
    /// publish a modified copy under the bucket lock.
    Tree(TreeBin<K, V>),
    /// The bucket was migrated to the next table during a resize. Readers and writers follow
    /// `Table::next`.
    Moved,
}

impl<K, V> BinEntry<K, V> {
    pub(super) fn as_node(&self) -> Option<&Node<K, V>> {
        match self {
            BinEntry::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// A chain node. The key and hash are immutable. The value is replaced atomically, and `next` is
/// only written while holding the bucket lock.
pub(super) struct Node<K, V> {
    pub(super) hash: u64,
    pub(super) key: K,
    pub(super) value: Atomic<V>,
    /// Always null or a `BinEntry::Node`.
    pub(super) next: Atomic<BinEntry<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(super) fn new(hash: u64, key: K, value: V) -> Self {
        Node {
            hash,
            key,
            value: Atomic::new(value),
            next: Atomic::null(),
        }
    }

    pub(super) fn load_value<'g>(&'g self, guard: &'g Guard) -> &'g V {
        // SAFETY: the value of a reachable node is never null. A replaced value is destroyed through
        // the epoch, so it outlives `guard`.
        unsafe { self.value.load(Ordering::Acquire, guard).deref() }
    }

    /// Take the key and the value back out of a node that was never published.
    pub(super) fn into_parts(self) -> (K, V) {
        let node = ManuallyDrop::new(self);
        // SAFETY: the node was never visible to another thread. `node` is not dropped, so the key is
        // moved out exactly once, and the value pointer of an unpublished node is non-null.
        unsafe {
            let key = ptr::read(&node.key);
            let value = node
                .value
                .load(Ordering::Relaxed, epoch::unprotected())
                .into_owned();
            (key, *value.into_box())
        }
    }
}

impl<K, V> Drop for Node<K, V> {
    fn drop(&mut self) {
        // A node is dropped when it is no longer reachable from any table, either through epoch
        // deferral or when the whole map is dropped. `next` is owned by the chain, not the node.
        unsafe {
            let value = self.value.load(Ordering::Relaxed, epoch::unprotected());
            if !value.is_null() {
                drop(value.into_owned());
            }
        }
    }
}

/// Iterate the nodes of a chain starting at `head`.
pub(super) fn chain<'g, K, V>(
    head: Shared<'g, BinEntry<K, V>>,
    guard: &'g Guard,
) -> ChainIter<'g, K, V> {
    ChainIter { cur: head, guard }
}

pub(super) struct ChainIter<'g, K, V> {
    cur: Shared<'g, BinEntry<K, V>>,
    guard: &'g Guard,
}

impl<'g, K, V> Iterator for ChainIter<'g, K, V> {
    type Item = &'g Node<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: unlinked nodes are reclaimed through the epoch and `guard` is pinned.
        let node = unsafe { self.cur.as_ref() }?.as_node()?;
        self.cur = node.next.load(Ordering::Acquire, self.guard);
        Some(node)
    }
}

/// Build a chain holding `entries` in order.
pub(super) fn build_chain<K, V>(entries: Vec<(u64, K, V)>) -> Atomic<BinEntry<K, V>> {
    let mut head = Atomic::null();
    for (hash, key, value) in entries.into_iter().rev() {
        let mut node = Node::new(hash, key, value);
        node.next = head;
        head = Atomic::new(BinEntry::Node(node));
    }
    head
}

/// Retire every entry of a chain (or a single tree or moved entry) that was just unlinked from
/// its table.
///
/// # Safety
///
/// `head` must no longer be reachable from any table, and must not be retired twice.
pub(super) unsafe fn defer_destroy_bin<K, V>(head: Shared<'_, BinEntry<K, V>>, guard: &Guard) {
    let mut cur = head;
    while let Some(entry) = cur.as_ref() {
        let next = entry
            .as_node()
            .map_or(Shared::null(), |node| node.next.load(Ordering::Acquire, guard));
        guard.defer_destroy(cur);
        cur = next;
    }
}

/// Destroy a bin immediately.
///
/// # Safety
///
/// No other thread may access the bin.
pub(super) unsafe fn destroy_bin<K, V>(head: Shared<'_, BinEntry<K, V>>) {
    let guard = epoch::unprotected();
    let mut cur = head;
    while !cur.is_null() {
        let next = cur
            .deref()
            .as_node()
            .map_or(Shared::null(), |node| node.next.load(Ordering::Relaxed, guard));
        drop(cur.into_owned());
        cur = next;
    }
}

/// A bin ordered by the full spread hash. Keys with an identical hash are kept in insertion order,
/// so keys only need `Eq`.
///
/// The set of keys of a published tree never changes: adding or removing a key publishes a copy.
/// Values are replaced in place, atomically, under the bucket lock.
pub(super) struct TreeBin<K, V> {
    entries: BTreeMap<u64, Vec<(K, Atomic<V>)>>,
    len: usize,
}

impl<K: Eq, V> TreeBin<K, V> {
    pub(super) fn from_entries(entries: impl IntoIterator<Item = (u64, K, V)>) -> Self {
        let mut tree = TreeBin {
            entries: BTreeMap::new(),
            len: 0,
        };
        for (hash, key, value) in entries {
            tree.insert(hash, key, value);
        }
        tree
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    fn slot(&self, hash: u64, key: &K) -> Option<&Atomic<V>> {
        self.entries
            .get(&hash)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub(super) fn get<'g>(&'g self, hash: u64, key: &K, guard: &'g Guard) -> Option<&'g V> {
        let value = self.slot(hash, key)?.load(Ordering::Acquire, guard);
        // SAFETY: a slot is never null, and replaced values are destroyed through the epoch.
        Some(unsafe { value.deref() })
    }

    /// Replace the value of `key` in place. Returns `false` if the key is absent. The caller must
    /// hold the bucket lock.
    pub(super) fn swap_value(&self, hash: u64, key: &K, value: V, guard: &Guard) -> bool {
        let Some(slot) = self.slot(hash, key) else {
            return false;
        };
        let old = slot.swap(Owned::new(value), Ordering::AcqRel, guard);
        // SAFETY: the old value is no longer reachable from the tree.
        unsafe { guard.defer_destroy(old) };
        true
    }

    /// Add a key that is not in this tree yet. Only for trees that are not published.
    pub(super) fn insert(&mut self, hash: u64, key: K, value: V) {
        let same_hash = self.entries.entry(hash).or_default();
        debug_assert!(same_hash.iter().all(|(k, _)| *k != key));
        same_hash.push((key, Atomic::new(value)));
        self.len += 1;
    }

    /// Remove a key. Only for trees that are not published.
    pub(super) fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        let same_hash = self.entries.get_mut(&hash)?;
        let index = same_hash.iter().position(|(k, _)| k == key)?;
        let (_, value) = same_hash.remove(index);
        if same_hash.is_empty() {
            self.entries.remove(&hash);
        }
        self.len -= 1;
        // SAFETY: the tree is not published, so nobody else can see the value.
        Some(unsafe { take_value(value) })
    }

    pub(super) fn iter<'g>(
        &'g self,
        guard: &'g Guard,
    ) -> impl Iterator<Item = (u64, &'g K, &'g V)> {
        self.entries.iter().flat_map(move |(hash, same_hash)| {
            same_hash.iter().map(move |(k, v)| {
                // SAFETY: see `get()`.
                (*hash, k, unsafe { v.load(Ordering::Acquire, guard).deref() })
            })
        })
    }

    /// A private copy of this tree with the current values.
    pub(super) fn copy(&self, guard: &Guard) -> Self
    where
        K: Clone,
        V: Clone,
    {
        TreeBin::from_entries(
            self.iter(guard)
                .map(|(hash, key, value)| (hash, key.clone(), value.clone())),
        )
    }

    /// Only for trees that are not published.
    pub(super) fn into_entries(mut self) -> Vec<(u64, K, V)> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .flat_map(|(hash, same_hash)| {
                same_hash.into_iter().map(move |(k, v)| {
                    // SAFETY: the tree is not published.
                    (hash, k, unsafe { take_value(v) })
                })
            })
            .collect()
    }
}

/// # Safety
///
/// No other thread may be able to load `value`.
unsafe fn take_value<V>(value: Atomic<V>) -> V {
    *value.into_owned().into_box()
}

impl<K, V> Drop for TreeBin<K, V> {
    fn drop(&mut self) {
        // Like `Node`, a tree is dropped once no table can reach it any more.
        for same_hash in self.entries.values() {
            for (_, value) in same_hash {
                unsafe {
                    drop(value.load(Ordering::Relaxed, epoch::unprotected()).into_owned());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_orders_by_hash_then_insertion() {
        let tree = TreeBin::from_entries(vec![(3, "c", 3), (1, "a", 1), (3, "b", 2)]);
        let guard = &epoch::pin();
        let keys: Vec<_> = tree.iter(guard).map(|(_, k, _)| *k).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn tree_swap_and_remove() {
        let mut tree = TreeBin::from_entries(vec![(7, "x", 1), (7, "y", 2)]);
        let guard = &epoch::pin();
        assert!(tree.swap_value(7, &"x", 10, guard));
        assert!(!tree.swap_value(8, &"x", 10, guard));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(7, &"x", guard), Some(&10));
        assert_eq!(tree.remove(7, &"y"), Some(2));
        assert_eq!(tree.remove(7, &"y"), None);
        assert_eq!(tree.get(8, &"x", guard), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn tree_copy_is_independent() {
        let tree = TreeBin::from_entries(vec![
            (1, String::from("a"), vec![1]),
            (2, String::from("b"), vec![2]),
        ]);
        let guard = &epoch::pin();
        let mut copy = tree.copy(guard);
        copy.insert(3, String::from("c"), vec![3]);
        assert!(copy.swap_value(1, &String::from("a"), vec![10], guard));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(1, &String::from("a"), guard), Some(&vec![1]));
        assert_eq!(
            copy.into_entries(),
            vec![
                (1, String::from("a"), vec![10]),
                (2, String::from("b"), vec![2]),
                (3, String::from("c"), vec![3]),
            ]
        );
    }

    #[test]
    fn chain_preserves_order() {
        let head = build_chain(vec![(1, 'a', 1), (2, 'b', 2), (3, 'c', 3)]);
        let guard = &epoch::pin();
        let keys: Vec<char> = chain(head.load(Ordering::Acquire, guard), guard)
            .map(|node| node.key)
            .collect();
        assert_eq!(keys, vec!['a', 'b', 'c']);
        unsafe { destroy_bin(head.load(Ordering::Relaxed, guard)) };
    }

    #[test]
    fn unpublished_node_gives_back_its_parts() {
        let node = Node::new(5, String::from("key"), vec![1, 2, 3]);
        let (key, value) = node.into_parts();
        assert_eq!(key, "key");
        assert_eq!(value, vec![1, 2, 3]);
    }
}
