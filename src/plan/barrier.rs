//! Generational write barrier.
//!
//! A young collection does not trace the old space. Instead, every old object that may hold a
//! reference into the young generation is kept in a remembered set, and the fields of remembered
//! objects are treated as roots of the young collection.

use crate::util::address::ObjectReference;
use crate::util::concurrent_map::ConcurrentMap;
use crate::util::object_table::{Generation, ObjectTable};

/// Old objects that may reference young objects.
pub(crate) struct RememberedSet {
    objects: ConcurrentMap<ObjectReference, ()>,
}

impl RememberedSet {
    pub fn new() -> Self {
        RememberedSet {
            objects: ConcurrentMap::new(),
        }
    }

    /// Remember an object. Returns `true` if it was not remembered before.
    pub fn remember(&self, object: ObjectReference) -> bool {
        matches!(self.objects.put_if_absent(object, ()), Ok(None))
    }

    pub fn forget(&self, object: ObjectReference) {
        let _ = self.objects.remove(&object);
    }

    pub fn contains(&self, object: ObjectReference) -> bool {
        self.objects.contains_key(&object).unwrap_or(false)
    }

    pub fn objects(&self) -> Vec<ObjectReference> {
        let mut objects = self.objects.keys();
        objects.sort_unstable();
        objects
    }

    pub fn clear(&self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.size()
    }
}

/// Object-remembering barrier: an old object is remembered the first time one of its fields is set
/// to a young object.
pub(crate) struct GenObjectBarrier<'a> {
    objects: &'a ObjectTable,
    remset: &'a RememberedSet,
}

impl<'a> GenObjectBarrier<'a> {
    pub fn new(objects: &'a ObjectTable, remset: &'a RememberedSet) -> Self {
        GenObjectBarrier { objects, remset }
    }

    fn references_young(&self, targets: &[ObjectReference]) -> bool {
        targets.iter().any(|target| {
            self.objects
                .get(*target)
                .is_some_and(|record| record.generation == Generation::Young)
        })
    }

    /// Called after the fields of `src` were set to `targets`.
    pub fn object_reference_write_post(
        &self,
        src: ObjectReference,
        src_generation: Generation,
        targets: &[ObjectReference],
    ) {
        if src_generation == Generation::Old
            && !self.remset.contains(src)
            && self.references_young(targets)
            && self.remset.remember(src)
        {
            trace!("remembered {}", src);
        }
    }
}
