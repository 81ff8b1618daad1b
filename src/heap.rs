//! The public heap API.
//!
//! A [`Heap`] is created by a [`HeapBuilder`]. Its capacities and thresholds are fixed once it is
//! built. The heap is shared between mutator threads: allocations that fit in Eden and field
//! stores run concurrently, while collections and byte writes hold the heap exclusively.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::plan::gencopy::GenCopy;
use crate::policy::region::{RegionKind, RegionUsage};
use crate::util::address::ObjectReference;
use crate::util::error::HeapError;
use crate::util::object_table::ObjectInfo;
use crate::util::options::Options;
use crate::util::statistics::HeapStats;

/// Heap builder. This is used to set options before creating a heap.
pub struct HeapBuilder {
    pub options: Options,
}

impl HeapBuilder {
    /// Create a builder with the default options, overridden by `GENHEAP_*` environment
    /// variables.
    pub fn new() -> Self {
        let mut builder = Self::new_no_env_vars();
        builder.options.read_env_var_settings();
        builder
    }

    /// Create a builder with the default options, ignoring environment variables.
    pub fn new_no_env_vars() -> Self {
        HeapBuilder {
            options: Options::default(),
        }
    }

    /// Set an option by name. Returns `false` if the name is unknown or the value is invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Set options from whitespace-separated `name=value` pairs.
    pub fn set_options_bulk_by_str(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_str(options)
    }

    pub fn build(&self) -> Heap {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("genheap initialized the logger."),
            Err(_) => debug!(
                "genheap failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        info!(
            "creating heap: eden {} bytes, survivors 2 x {} bytes, old {} bytes, tenuring threshold {}",
            self.options.eden_size,
            self.options.survivor_size,
            self.options.old_size,
            self.options.tenuring_threshold
        );
        Heap {
            plan: RwLock::new(GenCopy::new(&self.options)),
            options: self.options.clone(),
        }
    }
}

impl Default for HeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A simulated generational heap.
pub struct Heap {
    plan: RwLock<GenCopy>,
    options: Options,
}

impl Heap {
    fn read(&self) -> RwLockReadGuard<'_, GenCopy> {
        // The plan is consistent between operations even if a thread panicked while holding it.
        self.plan.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GenCopy> {
        self.plan.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Allocate an object of `size` bytes.
    ///
    /// `roots` must be every object the caller still uses, directly or through fields. If Eden is
    /// full, a young collection runs, and objects not reachable from `roots` are reclaimed. An
    /// object larger than Eden is allocated directly in the old space.
    ///
    /// Returns [`HeapError::OutOfMemory`] if there is no room even after a full collection. The
    /// heap is left valid and usable in that case.
    pub fn allocate(
        &self,
        size: usize,
        roots: &[ObjectReference],
    ) -> Result<ObjectReference, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }
        if let Some(object) = self.read().alloc_fast(size) {
            return Ok(object);
        }
        self.write().alloc_slow(size, roots)
    }

    /// Run a young collection now.
    pub fn collect_young(&self, roots: &[ObjectReference]) -> Result<(), HeapError> {
        let mut plan = self.write();
        match plan.collect_young(roots) {
            Ok(()) => Ok(()),
            Err(failure) => {
                warn!("{}", failure);
                Err(plan.out_of_memory(failure.requested))
            }
        }
    }

    /// Run a full mark-compact collection of the old space now.
    pub fn collect_full(&self, roots: &[ObjectReference]) {
        self.write().collect_full(roots);
    }

    pub fn stats(&self) -> HeapStats {
        self.read().stats.snapshot()
    }

    /// Replace the fields of `object`. Every field must refer to an object in the heap.
    pub fn set_fields(
        &self,
        object: ObjectReference,
        fields: Vec<ObjectReference>,
    ) -> Result<(), HeapError> {
        self.read().set_fields(object, fields)
    }

    pub fn push_field(
        &self,
        object: ObjectReference,
        target: ObjectReference,
    ) -> Result<(), HeapError> {
        self.read().push_field(object, target)
    }

    pub fn fields(&self, object: ObjectReference) -> Result<Vec<ObjectReference>, HeapError> {
        self.read()
            .objects
            .get(object)
            .map(|record| record.fields)
            .ok_or(HeapError::DanglingReference(object))
    }

    pub fn object(&self, object: ObjectReference) -> Option<ObjectInfo> {
        self.read()
            .objects
            .get(object)
            .map(|record| ObjectInfo::new(object, &record))
    }

    pub fn contains(&self, object: ObjectReference) -> bool {
        self.read().objects.contains(object)
    }

    /// The number of objects in the heap, including garbage that was not collected yet.
    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    pub fn region_usage(&self, kind: RegionKind) -> RegionUsage {
        self.read().regions[kind].usage()
    }

    /// The objects of the old space, by ascending offset.
    pub fn old_space_layout(&self) -> Vec<ObjectInfo> {
        let mut layout: Vec<ObjectInfo> = self
            .read()
            .objects
            .records()
            .iter()
            .filter(|(_, record)| record.location.region == RegionKind::Old)
            .map(|(object, record)| ObjectInfo::new(*object, record))
            .collect();
        layout.sort_by_key(|info| info.location.offset);
        layout
    }

    /// Whether `object` is in the remembered set.
    pub fn is_remembered(&self, object: ObjectReference) -> bool {
        self.read().remset.contains(object)
    }

    fn check_bounds(
        size: usize,
        object: ObjectReference,
        offset: usize,
        len: usize,
    ) -> Result<(), HeapError> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(HeapError::OutOfBounds {
                object,
                offset,
                len,
            }),
        }
    }

    /// Read `len` bytes of `object` starting at `offset` within the object.
    pub fn read_bytes(
        &self,
        object: ObjectReference,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, HeapError> {
        let plan = self.read();
        let record = plan
            .objects
            .get(object)
            .ok_or(HeapError::DanglingReference(object))?;
        Self::check_bounds(record.size, object, offset, len)?;
        let location = record.location;
        Ok(plan.regions[location.region]
            .read(location.offset + offset, len)
            .to_vec())
    }

    /// Write `bytes` into `object` starting at `offset` within the object.
    pub fn write_bytes(
        &self,
        object: ObjectReference,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), HeapError> {
        let mut plan = self.write();
        let record = plan
            .objects
            .get(object)
            .ok_or(HeapError::DanglingReference(object))?;
        Self::check_bounds(record.size, object, offset, bytes.len())?;
        let location = record.location;
        plan.regions[location.region].write(location.offset + offset, bytes);
        Ok(())
    }

    /// Check the heap invariants. Objects reachable from `roots` must not reference reclaimed
    /// objects.
    pub fn verify(&self, roots: &[ObjectReference]) -> Result<(), String> {
        crate::util::sanity::verify_heap(&self.write(), Some(roots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        let mut builder = HeapBuilder::new_no_env_vars();
        assert!(builder.set_options_bulk_by_str("eden_size=100 survivor_size=100 old_size=200"));
        builder.build()
    }

    #[test]
    fn zero_sized_objects_are_rejected() {
        let heap = heap();
        assert_eq!(heap.allocate(0, &[]), Err(HeapError::InvalidSize));
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn builder_rejects_invalid_options() {
        let mut builder = HeapBuilder::new_no_env_vars();
        assert!(!builder.set_option("tenuring_threshold", "99"));
        assert!(builder.set_option("tenuring_threshold", "4"));
        assert_eq!(builder.build().options().tenuring_threshold, 4);
    }

    #[test]
    fn bytes_are_bounds_checked() {
        let heap = heap();
        let a = heap.allocate(8, &[]).unwrap();
        heap.write_bytes(a, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(heap.read_bytes(a, 2, 6).unwrap(), vec![0, 0, 1, 2, 3, 4]);
        assert_eq!(
            heap.write_bytes(a, 6, &[0; 3]),
            Err(HeapError::OutOfBounds {
                object: a,
                offset: 6,
                len: 3
            })
        );
        assert!(heap.read_bytes(a, usize::MAX, 2).is_err());
    }

    #[test]
    fn reclaimed_handles_dangle() {
        let heap = heap();
        let a = heap.allocate(60, &[]).unwrap();
        let _b = heap.allocate(60, &[]).unwrap();
        assert!(!heap.contains(a));
        assert_eq!(heap.fields(a), Err(HeapError::DanglingReference(a)));
        assert_eq!(heap.read_bytes(a, 0, 1), Err(HeapError::DanglingReference(a)));
        assert!(heap.object(a).is_none());
    }

    #[test]
    fn region_usage_and_layout() {
        let heap = heap();
        heap.allocate(30, &[]).unwrap();
        let big = heap.allocate(150, &[]).unwrap();
        assert_eq!(
            heap.region_usage(RegionKind::Eden),
            RegionUsage {
                used: 30,
                capacity: 100
            }
        );
        let layout = heap.old_space_layout();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0].handle, big);
        assert_eq!(heap.verify(&[big]), Ok(()));
    }
}
