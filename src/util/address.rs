use std::fmt;
use std::num::NonZeroU64;

use crate::policy::region::RegionKind;

/// An opaque handle to a simulated object.
///
/// Handles are identities, not addresses. A collection may move the object to another region or
/// offset, but the handle stays the same for the whole lifetime of the object, and is never reused
/// after the object is reclaimed.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq)]
pub struct ObjectReference(NonZeroU64);

impl ObjectReference {
    /// Create a handle from a raw value. Returns `None` for zero.
    pub fn from_raw(raw: u64) -> Option<ObjectReference> {
        NonZeroU64::new(raw).map(ObjectReference)
    }

    /// The raw value of this handle.
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the bytes of an object live.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Location {
    pub region: RegionKind,
    pub offset: usize,
}

impl Location {
    pub const fn new(region: RegionKind, offset: usize) -> Self {
        Location { region, offset }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.region, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(ObjectReference::from_raw(0).is_none());
        assert_eq!(ObjectReference::from_raw(42).unwrap().as_raw(), 42);
    }

    #[test]
    fn display_location() {
        let loc = Location::new(RegionKind::Old, 0x40);
        assert_eq!(format!("{}", loc), "old+0x40");
    }
}
