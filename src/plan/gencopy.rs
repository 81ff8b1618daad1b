//! The generational copying plan.
//!
//! The young generation is Eden plus two survivor spaces, collected by
//! [`copyspace`](crate::policy::copyspace). The old space is collected by
//! [`markcompactspace`](crate::policy::markcompactspace). This module decides which collector runs
//! and escalates from one to the other when an allocation cannot be satisfied.

use std::time::Instant;

use enum_map::EnumMap;

use crate::plan::barrier::{GenObjectBarrier, RememberedSet};
use crate::policy::region::{Region, RegionKind};
use crate::policy::{copyspace, markcompactspace};
use crate::util::address::{Location, ObjectReference};
use crate::util::concurrent_map::MapConfig;
use crate::util::error::{HeapError, PromotionFailure};
use crate::util::object_table::{Generation, ObjectRecord, ObjectTable};
use crate::util::options::Options;
use crate::util::statistics::SharedStats;

pub(crate) struct GenCopy {
    pub regions: EnumMap<RegionKind, Region>,
    pub objects: ObjectTable,
    pub remset: RememberedSet,
    /// The survivor space that is empty between collections.
    pub to_space: RegionKind,
    pub tenuring_threshold: usize,
    pub stats: SharedStats,
}

impl GenCopy {
    pub fn new(options: &Options) -> Self {
        let regions = EnumMap::from_fn(|kind| {
            let capacity = match kind {
                RegionKind::Eden => options.eden_size,
                RegionKind::Survivor0 | RegionKind::Survivor1 => options.survivor_size,
                RegionKind::Old => options.old_size,
            };
            Region::new(kind, capacity)
        });
        GenCopy {
            regions,
            objects: ObjectTable::new(MapConfig::from_options(options)),
            remset: RememberedSet::new(),
            to_space: RegionKind::Survivor1,
            tenuring_threshold: options.tenuring_threshold,
            stats: SharedStats::default(),
        }
    }

    /// The survivor space that holds the survivors of the last young collection.
    pub fn from_space(&self) -> RegionKind {
        match self.to_space {
            RegionKind::Survivor0 => RegionKind::Survivor1,
            RegionKind::Survivor1 => RegionKind::Survivor0,
            kind => unreachable!("{} is not a survivor space", kind),
        }
    }

    /// Bump-allocate in Eden. This only needs shared access, so mutators can allocate
    /// concurrently.
    pub fn alloc_fast(&self, size: usize) -> Option<ObjectReference> {
        let offset = self.regions[RegionKind::Eden].try_allocate(size).ok()?;
        let object = self.objects.insert(ObjectRecord::new(
            size,
            Generation::Young,
            Location::new(RegionKind::Eden, offset),
        ));
        SharedStats::add(&self.stats.bytes_allocated, size);
        Some(object)
    }

    /// Allocate when the fast path failed. `roots` must be the complete root set.
    pub fn alloc_slow(
        &mut self,
        size: usize,
        roots: &[ObjectReference],
    ) -> Result<ObjectReference, HeapError> {
        if size > self.regions[RegionKind::Eden].capacity() {
            return self.pretenure(size, roots);
        }
        // Another mutator may have collected while we were waiting for the lock.
        if let Some(object) = self.alloc_fast(size) {
            return Ok(object);
        }
        trace!("Eden is full, {} bytes requested", size);
        if let Err(failure) = self.collect_young(roots) {
            warn!("{}", failure);
            return Err(self.out_of_memory(size));
        }
        match self.alloc_fast(size) {
            Some(object) => Ok(object),
            None => Err(self.out_of_memory(size)),
        }
    }

    /// Allocate directly in the old space. Runs one full collection if the old space is full.
    pub fn pretenure(
        &mut self,
        size: usize,
        roots: &[ObjectReference],
    ) -> Result<ObjectReference, HeapError> {
        let offset = match self.regions[RegionKind::Old].try_allocate(size) {
            Ok(offset) => offset,
            Err(e) => {
                debug!("cannot pretenure: {}", e);
                self.collect_full(roots);
                match self.regions[RegionKind::Old].try_allocate(size) {
                    Ok(offset) => offset,
                    Err(_) => return Err(self.out_of_memory(size)),
                }
            }
        };
        let object = self.objects.insert(ObjectRecord::new(
            size,
            Generation::Old,
            Location::new(RegionKind::Old, offset),
        ));
        SharedStats::add(&self.stats.bytes_allocated, size);
        SharedStats::add(&self.stats.pretenured_bytes, size);
        self.stats
            .update_old_space_peak(self.regions[RegionKind::Old].used());
        trace!("pretenured {} ({} bytes) at {}", object, size, offset);
        Ok(object)
    }

    pub fn out_of_memory(&self, size: usize) -> HeapError {
        SharedStats::increment(&self.stats.out_of_memory_errors);
        warn!("out of memory: {} bytes requested", size);
        HeapError::OutOfMemory { requested: size }
    }

    /// Run a young collection. If an object cannot be promoted, run a full collection and retry
    /// the young collection once.
    pub fn collect_young(&mut self, roots: &[ObjectReference]) -> Result<(), PromotionFailure> {
        let start = Instant::now();
        let result = match copyspace::collect(self, roots) {
            Ok(()) => Ok(()),
            Err(failure) => {
                SharedStats::increment(&self.stats.promotion_failures);
                info!("{}, running a full collection", failure);
                markcompactspace::collect(self, roots);
                copyspace::collect(self, roots).map_err(|failure| {
                    SharedStats::increment(&self.stats.promotion_failures);
                    failure
                })
            }
        };
        self.stats.record_pause(start.elapsed());
        self.sanity_check(roots);
        result
    }

    pub fn collect_full(&mut self, roots: &[ObjectReference]) {
        let start = Instant::now();
        markcompactspace::collect(self, roots);
        self.stats.record_pause(start.elapsed());
        self.sanity_check(roots);
    }

    #[cfg(feature = "sanity")]
    fn sanity_check(&self, roots: &[ObjectReference]) {
        if let Err(e) = crate::util::sanity::verify_heap(self, Some(roots)) {
            panic!("heap verification failed after a collection: {}", e);
        }
    }

    #[cfg(not(feature = "sanity"))]
    fn sanity_check(&self, _roots: &[ObjectReference]) {}

    /// Check that every handle refers to an object in the table.
    fn check_live(&self, objects: &[ObjectReference]) -> Result<(), HeapError> {
        match objects.iter().find(|object| !self.objects.contains(**object)) {
            Some(object) => Err(HeapError::DanglingReference(*object)),
            None => Ok(()),
        }
    }

    /// Replace the fields of `object`.
    pub fn set_fields(
        &self,
        object: ObjectReference,
        fields: Vec<ObjectReference>,
    ) -> Result<(), HeapError> {
        let generation = self
            .objects
            .get(object)
            .ok_or(HeapError::DanglingReference(object))?
            .generation;
        self.check_live(&fields)?;
        let barrier = GenObjectBarrier::new(&self.objects, &self.remset);
        barrier.object_reference_write_post(object, generation, &fields);
        self.objects.update(object, |record| record.fields = fields);
        Ok(())
    }

    /// Append a field to `object`.
    pub fn push_field(
        &self,
        object: ObjectReference,
        target: ObjectReference,
    ) -> Result<(), HeapError> {
        let generation = self
            .objects
            .get(object)
            .ok_or(HeapError::DanglingReference(object))?
            .generation;
        self.check_live(&[target])?;
        let barrier = GenObjectBarrier::new(&self.objects, &self.remset);
        barrier.object_reference_write_post(object, generation, &[target]);
        self.objects.update(object, |record| record.fields.push(target));
        Ok(())
    }

    /// Copy `len` bytes between regions.
    pub fn copy_bytes(&mut self, from: Location, to: Location, len: usize) {
        if from.region == to.region {
            self.regions[from.region].move_within(from.offset, to.offset, len);
            return;
        }
        let bytes = self.regions[from.region].read(from.offset, len).to_vec();
        self.regions[to.region].write(to.offset, &bytes);
    }
}
