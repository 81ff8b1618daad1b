//! Error types.
//!
//! Only [`HeapError`] crosses the public heap API. [`InsufficientSpace`] and [`PromotionFailure`]
//! are handled inside the heap by escalating to the next collection tier.

use std::fmt;

use crate::policy::region::RegionKind;
use crate::util::address::ObjectReference;

/// Errors returned by [`Heap`](crate::Heap).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeapError {
    /// No space is left for the allocation after every collection and retry was attempted.
    /// The heap is still consistent and can be used for further allocations.
    OutOfMemory { requested: usize },
    /// Objects must be at least one byte.
    InvalidSize,
    /// The handle does not refer to an object in the heap. It was either never allocated by this
    /// heap, or the object was reclaimed.
    DanglingReference(ObjectReference),
    /// A byte access outside of the object.
    OutOfBounds {
        object: ObjectReference,
        offset: usize,
        len: usize,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory { requested } => {
                write!(f, "out of memory: cannot allocate {} bytes", requested)
            }
            HeapError::InvalidSize => write!(f, "objects must not be zero-sized"),
            HeapError::DanglingReference(object) => {
                write!(f, "{} does not refer to a live object", object)
            }
            HeapError::OutOfBounds {
                object,
                offset,
                len,
            } => write!(
                f,
                "access of {} bytes at offset {} is outside of {}",
                len, offset, object
            ),
        }
    }
}

impl std::error::Error for HeapError {}

/// A region could not satisfy a bump allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct InsufficientSpace {
    pub region: RegionKind,
    pub requested: usize,
    pub available: usize,
}

impl fmt::Display for InsufficientSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} bytes requested, {} bytes available",
            self.region, self.requested, self.available
        )
    }
}

/// A young collection could not place a promoted object in the old space, even after a full
/// collection. The young collection was rolled back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct PromotionFailure {
    pub object: ObjectReference,
    pub requested: usize,
}

impl fmt::Display for PromotionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to promote {} ({} bytes) into the old space",
            self.object, self.requested
        )
    }
}
