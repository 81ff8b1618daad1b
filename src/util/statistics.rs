//! Heap statistics.
//!
//! Counters live in [`SharedStats`] and are updated with relaxed atomics, so the allocation fast
//! path can count without taking the heap lock. [`HeapStats`] is a plain snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct SharedStats {
    pub minor_collections: AtomicUsize,
    pub major_collections: AtomicUsize,
    pub bytes_promoted: AtomicUsize,
    pub old_space_peak: AtomicUsize,
    pub promotion_failures: AtomicUsize,
    pub bytes_allocated: AtomicUsize,
    pub pretenured_bytes: AtomicUsize,
    pub out_of_memory_errors: AtomicUsize,
    /// Total collection pause in nanoseconds.
    total_pause_ns: AtomicU64,
}

impl SharedStats {
    pub fn add(counter: &AtomicUsize, val: usize) {
        counter.fetch_add(val, Ordering::Relaxed);
    }

    pub fn increment(counter: &AtomicUsize) {
        Self::add(counter, 1);
    }

    pub fn update_old_space_peak(&self, used: usize) {
        self.old_space_peak.fetch_max(used, Ordering::Relaxed);
    }

    pub fn record_pause(&self, pause: Duration) {
        self.total_pause_ns
            .fetch_add(pause.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HeapStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        HeapStats {
            minor_collections: load(&self.minor_collections),
            major_collections: load(&self.major_collections),
            bytes_promoted: load(&self.bytes_promoted),
            old_space_peak: load(&self.old_space_peak),
            promotion_failures: load(&self.promotion_failures),
            bytes_allocated: load(&self.bytes_allocated),
            pretenured_bytes: load(&self.pretenured_bytes),
            out_of_memory_errors: load(&self.out_of_memory_errors),
            total_pause: Duration::from_nanos(self.total_pause_ns.load(Ordering::Relaxed)),
        }
    }
}

/// A snapshot of the heap counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Completed young collections. A young collection that was rolled back because of a
    /// promotion failure is not counted.
    pub minor_collections: usize,
    /// Completed old space collections.
    pub major_collections: usize,
    /// Bytes copied from the young generation into the old space.
    pub bytes_promoted: usize,
    /// The highest old space usage seen after any collection or pretenured allocation.
    pub old_space_peak: usize,
    pub promotion_failures: usize,
    /// Bytes of successful allocations.
    pub bytes_allocated: usize,
    /// Bytes allocated directly in the old space because the object does not fit in Eden.
    pub pretenured_bytes: usize,
    pub out_of_memory_errors: usize,
    pub total_pause: Duration,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "minor collections:    {}", self.minor_collections)?;
        writeln!(f, "major collections:    {}", self.major_collections)?;
        writeln!(f, "bytes allocated:      {}", self.bytes_allocated)?;
        writeln!(f, "bytes promoted:       {}", self.bytes_promoted)?;
        writeln!(f, "bytes pretenured:     {}", self.pretenured_bytes)?;
        writeln!(f, "old space peak:       {}", self.old_space_peak)?;
        writeln!(f, "promotion failures:   {}", self.promotion_failures)?;
        writeln!(f, "out of memory errors: {}", self.out_of_memory_errors)?;
        write!(f, "total pause:          {:.3}ms", self.total_pause.as_secs_f64() * 1e3)
    }
}
