//! Sliding mark-compact collection of the old space.
//!
//! 1. Mark: trace from the roots through both generations and mark every reached old object.
//! 2. Forward: walk the old objects by ascending offset and give each marked object the lowest free
//!    offset. The relative order of survivors is preserved.
//! 3. Compact: slide the bytes of each survivor down and commit its new location. Unmarked objects
//!    are removed from the object table and the remembered set.
//!
//! Compacting an old space that holds no garbage leaves every object where it was.

use std::collections::{HashSet, VecDeque};

use itertools::Itertools;

use crate::plan::gencopy::GenCopy;
use crate::policy::region::RegionKind;
use crate::util::address::{Location, ObjectReference};
use crate::util::object_forwarding::{commit_forwarding, forward_object};
use crate::util::object_table::Generation;
use crate::util::statistics::SharedStats;

struct Survivor {
    object: ObjectReference,
    from: usize,
    to: usize,
    size: usize,
}

pub(crate) fn collect(plan: &mut GenCopy, roots: &[ObjectReference]) {
    let used_before = plan.regions[RegionKind::Old].used();
    let marked = mark(plan, roots);
    let survivors = forward(plan, &marked);
    let compacted = compact(plan, &survivors);

    SharedStats::increment(&plan.stats.major_collections);
    plan.stats.update_old_space_peak(compacted);
    info!(
        "full collection: {} old objects survived, old space {} -> {} bytes",
        survivors.len(),
        used_before,
        compacted
    );
}

/// Trace from `roots` through both generations and return the old objects reached.
pub(crate) fn mark(plan: &GenCopy, roots: &[ObjectReference]) -> HashSet<ObjectReference> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<ObjectReference> = roots
        .iter()
        .copied()
        .filter(|object| visited.insert(*object))
        .collect();
    let mut marked = HashSet::new();
    while let Some(object) = queue.pop_front() {
        let Some(record) = plan.objects.get(object) else {
            debug!("ignoring reference to unknown object {}", object);
            continue;
        };
        if record.generation == Generation::Old {
            marked.insert(object);
        }
        for field in record.fields {
            if visited.insert(field) {
                queue.push_back(field);
            }
        }
    }
    trace!("marked {} old objects", marked.len());
    marked
}

/// Assign compacted locations to the marked objects and drop the unmarked ones.
fn forward(plan: &mut GenCopy, marked: &HashSet<ObjectReference>) -> Vec<Survivor> {
    let old_objects = plan
        .objects
        .records()
        .into_iter()
        .filter(|(_, record)| record.location.region == RegionKind::Old)
        .sorted_by_key(|(_, record)| record.location.offset);

    let mut survivors = vec![];
    let mut cursor = 0;
    for (object, record) in old_objects {
        if marked.contains(&object) {
            forward_object(&plan.objects, object, Location::new(RegionKind::Old, cursor));
            survivors.push(Survivor {
                object,
                from: record.location.offset,
                to: cursor,
                size: record.size,
            });
            cursor += record.size;
        } else {
            trace!("reclaiming {} at {}", object, record.location);
            plan.objects.remove(object);
            plan.remset.forget(object);
        }
    }
    survivors
}

/// Slide the survivors down. Returns the compacted size of the old space.
fn compact(plan: &mut GenCopy, survivors: &[Survivor]) -> usize {
    let old = &mut plan.regions[RegionKind::Old];
    // Ascending order: a survivor never overwrites one that has not moved yet.
    for survivor in survivors {
        if survivor.from != survivor.to {
            old.move_within(survivor.from, survivor.to, survivor.size);
        }
    }
    let compacted = survivors.last().map_or(0, |s| s.to + s.size);
    old.reset_cursor(compacted);

    for survivor in survivors {
        plan.objects.update(survivor.object, |record| {
            commit_forwarding(record);
        });
    }
    compacted
}
