//! The table of live simulated objects.
//!
//! An object's metadata (size, age, generation, location, forwarding and fields) is kept here,
//! separated from the raw bytes in the regions. The table is a [`ConcurrentMap`] keyed by handle,
//! so mutators can allocate and update objects without the exclusive heap lock.

use std::sync::atomic::{AtomicU64, Ordering};

use strum_macros::Display;

use crate::util::address::{Location, ObjectReference};
use crate::util::concurrent_map::{ConcurrentMap, MapConfig, Nullable};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Display)]
pub enum Generation {
    #[strum(serialize = "young")]
    Young,
    #[strum(serialize = "old")]
    Old,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ObjectRecord {
    pub size: usize,
    /// The number of young collections the object survived.
    pub age: usize,
    pub generation: Generation,
    pub location: Location,
    /// The new location, only while a collection is copying or compacting this object.
    pub forwarding: Option<Location>,
    pub fields: Vec<ObjectReference>,
}

impl ObjectRecord {
    pub fn new(size: usize, generation: Generation, location: Location) -> Self {
        ObjectRecord {
            size,
            age: 0,
            generation,
            location,
            forwarding: None,
            fields: vec![],
        }
    }

    /// The first offset past the object.
    pub fn end(&self) -> usize {
        self.location.offset + self.size
    }
}

impl Nullable for ObjectReference {}
impl Nullable for ObjectRecord {}

/// A snapshot of an object, as returned by [`Heap::object`](crate::Heap::object).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub handle: ObjectReference,
    pub size: usize,
    pub age: usize,
    pub generation: Generation,
    pub location: Location,
    pub fields: Vec<ObjectReference>,
}

impl ObjectInfo {
    pub(crate) fn new(handle: ObjectReference, record: &ObjectRecord) -> Self {
        ObjectInfo {
            handle,
            size: record.size,
            age: record.age,
            generation: record.generation,
            location: record.location,
            fields: record.fields.clone(),
        }
    }
}

pub(crate) struct ObjectTable {
    objects: ConcurrentMap<ObjectReference, ObjectRecord>,
    /// Handles are never reused. Zero is not a valid handle.
    next_handle: AtomicU64,
}

impl ObjectTable {
    pub fn new(config: MapConfig) -> Self {
        ObjectTable {
            objects: ConcurrentMap::with_config(config),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a new object and return its handle.
    pub fn insert(&self, record: ObjectRecord) -> ObjectReference {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let Some(handle) = ObjectReference::from_raw(raw) else {
            unreachable!("object handles wrapped around")
        };
        let previous = self.objects.put_if_absent(handle, record);
        debug_assert!(
            matches!(previous, Ok(None)),
            "handle {} was issued twice",
            handle
        );
        handle
    }

    pub fn get(&self, object: ObjectReference) -> Option<ObjectRecord> {
        self.objects.get(&object).ok().flatten()
    }

    pub fn contains(&self, object: ObjectReference) -> bool {
        self.objects.contains_key(&object).unwrap_or(false)
    }

    /// Atomically update a present object. Returns `false` if the object is not in the table.
    pub fn update<F>(&self, object: ObjectReference, f: F) -> bool
    where
        F: FnOnce(&mut ObjectRecord),
    {
        self.objects
            .compute_if_present(&object, |record| {
                let mut record = record.clone();
                f(&mut record);
                Some(record)
            })
            .ok()
            .flatten()
            .is_some()
    }

    pub fn remove(&self, object: ObjectReference) -> Option<ObjectRecord> {
        self.objects.remove(&object).ok().flatten()
    }

    /// Every object, ordered by handle.
    pub fn records(&self) -> Vec<(ObjectReference, ObjectRecord)> {
        let mut records = Vec::with_capacity(self.objects.size());
        self.objects
            .for_each(|handle, record| records.push((*handle, record.clone())));
        records.sort_unstable_by_key(|(handle, _)| *handle);
        records
    }

    pub fn len(&self) -> usize {
        self.objects.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::region::RegionKind;

    fn eden(offset: usize) -> Location {
        Location::new(RegionKind::Eden, offset)
    }

    #[test]
    fn handles_are_unique_and_ordered() {
        let table = ObjectTable::new(MapConfig::default());
        let a = table.insert(ObjectRecord::new(8, Generation::Young, eden(0)));
        let b = table.insert(ObjectRecord::new(8, Generation::Young, eden(8)));
        assert_ne!(a, b);
        assert!(a < b);
        table.remove(a);
        let c = table.insert(ObjectRecord::new(8, Generation::Young, eden(16)));
        assert_ne!(a, c);
        let handles: Vec<_> = table.records().into_iter().map(|(h, _)| h).collect();
        assert_eq!(handles, vec![b, c]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "was issued twice")]
    fn reissued_handle_is_caught() {
        let table = ObjectTable::new(MapConfig::default());
        table.insert(ObjectRecord::new(8, Generation::Young, eden(0)));
        table.next_handle.store(1, Ordering::Relaxed);
        table.insert(ObjectRecord::new(8, Generation::Young, eden(8)));
    }

    #[test]
    fn update_present_object() {
        let table = ObjectTable::new(MapConfig::default());
        let a = table.insert(ObjectRecord::new(16, Generation::Young, eden(0)));
        assert!(table.update(a, |record| record.age += 1));
        assert_eq!(table.get(a).unwrap().age, 1);
        table.remove(a);
        assert!(!table.update(a, |record| record.age += 1));
        assert!(!table.contains(a));
        assert_eq!(table.len(), 0);
    }
}
