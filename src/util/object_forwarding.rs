//! Forwarding of objects during a copying or compacting collection.
//!
//! A collector first records the new location of each object it moves. Once every object has
//! been assigned a location, the collection either commits all the forwarding locations, or (if
//! it has to be abandoned) clears them. No record keeps a forwarding location between collections.

use crate::util::address::{Location, ObjectReference};
use crate::util::object_table::{ObjectRecord, ObjectTable};

pub(crate) fn is_forwarded(record: &ObjectRecord) -> bool {
    record.forwarding.is_some()
}

/// Record `to` as the new location of `object`. An object is forwarded at most once per
/// collection.
pub(crate) fn forward_object(table: &ObjectTable, object: ObjectReference, to: Location) {
    table.update(object, |record| {
        debug_assert!(
            record.forwarding.is_none(),
            "{} is already forwarded to {:?}",
            object,
            record.forwarding
        );
        record.forwarding = Some(to);
    });
}

/// Move the record to its forwarding location. Returns the old location, or `None` if the object
/// was not forwarded.
pub(crate) fn commit_forwarding(record: &mut ObjectRecord) -> Option<Location> {
    let to = record.forwarding.take()?;
    Some(std::mem::replace(&mut record.location, to))
}

pub(crate) fn clear_forwarding(table: &ObjectTable, object: ObjectReference) {
    table.update(object, |record| record.forwarding = None);
}
