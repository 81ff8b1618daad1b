//! Copying collection of the young generation.
//!
//! Eden and the from-space are evacuated into the to-space, or promoted into the old space once an
//! object is old enough or the to-space is full. The old space is not evacuated: old objects that
//! reference young objects are found through the remembered set, and only those still reachable
//! from the roots contribute young roots.
//!
//! Evacuation first assigns a forwarding location to every live object and copies its bytes. If an
//! object cannot be promoted, the whole evacuation is undone: forwarding is cleared, and the
//! to-space and the old space are cut back to their cursors from before the collection.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::plan::gencopy::GenCopy;
use crate::policy::markcompactspace;
use crate::policy::region::RegionKind;
use crate::util::address::{Location, ObjectReference};
use crate::util::error::PromotionFailure;
use crate::util::object_forwarding::{clear_forwarding, commit_forwarding, forward_object, is_forwarded};
use crate::util::object_table::Generation;
use crate::util::statistics::SharedStats;

/// Collect the young generation. On error, the heap is left as it was before the call.
pub(crate) fn collect(
    plan: &mut GenCopy,
    roots: &[ObjectReference],
) -> Result<(), PromotionFailure> {
    debug_assert!(
        plan.regions[plan.to_space].is_empty(),
        "{} must be empty between collections",
        plan.to_space
    );
    let live = trace_nursery(plan, roots);
    debug!(
        "young collection: {} live young objects, {} objects in the table",
        live.len(),
        plan.objects.len()
    );

    let old_cursor = plan.regions[RegionKind::Old].used();
    if let Err(failure) = evacuate(plan, &live) {
        debug!("{}, rolling back the evacuation", failure);
        rollback(plan, &live, old_cursor);
        return Err(failure);
    }
    commit(plan, &live);
    Ok(())
}

/// Remembered objects that are reachable from the roots. A dead old object keeps its fields until
/// the next full collection, but they must not keep young objects alive.
fn live_remembered_objects(plan: &GenCopy, roots: &[ObjectReference]) -> Vec<ObjectReference> {
    let remembered = plan.remset.objects();
    if remembered.is_empty() {
        return remembered;
    }
    let reachable_old = markcompactspace::mark(plan, roots);
    remembered
        .into_iter()
        .filter(|object| reachable_old.contains(object))
        .collect()
}

/// Find the live young objects in breadth-first order. The roots and the fields of live remembered
/// objects are the starting points. Old objects end the traversal.
fn trace_nursery(plan: &GenCopy, roots: &[ObjectReference]) -> Vec<ObjectReference> {
    let remembered_fields: Vec<ObjectReference> = live_remembered_objects(plan, roots)
        .into_iter()
        .filter_map(|object| plan.objects.get(object))
        .flat_map(|record| record.fields)
        .collect();

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    for &object in roots.iter().chain(remembered_fields.iter()) {
        if visited.insert(object) {
            queue.push_back(object);
        }
    }

    let mut live = vec![];
    while let Some(object) = queue.pop_front() {
        let Some(record) = plan.objects.get(object) else {
            debug!("ignoring reference to unknown object {}", object);
            continue;
        };
        if record.generation == Generation::Old {
            continue;
        }
        live.push(object);
        for field in record.fields {
            if visited.insert(field) {
                queue.push_back(field);
            }
        }
    }
    live
}

fn evacuate(plan: &mut GenCopy, live: &[ObjectReference]) -> Result<(), PromotionFailure> {
    let to_space = plan.to_space;
    for &object in live {
        let Some(record) = plan.objects.get(object) else {
            continue;
        };
        if is_forwarded(&record) {
            continue;
        }
        let tenured = record.age + 1 >= plan.tenuring_threshold;
        let survivor = if tenured {
            None
        } else {
            plan.regions[to_space]
                .try_allocate(record.size)
                .ok()
                .map(|offset| Location::new(to_space, offset))
        };
        let target = match survivor {
            Some(target) => target,
            None => match plan.regions[RegionKind::Old].try_allocate(record.size) {
                Ok(offset) => Location::new(RegionKind::Old, offset),
                Err(e) => {
                    trace!("cannot promote {}: {}", object, e);
                    return Err(PromotionFailure {
                        object,
                        requested: record.size,
                    });
                }
            },
        };
        plan.copy_bytes(record.location, target, record.size);
        forward_object(&plan.objects, object, target);
    }
    Ok(())
}

fn rollback(plan: &mut GenCopy, live: &[ObjectReference], old_cursor: usize) {
    for &object in live {
        clear_forwarding(&plan.objects, object);
    }
    let to_space = plan.to_space;
    plan.regions[to_space].reset();
    plan.regions[RegionKind::Old].reset_cursor(old_cursor);
}

fn commit(plan: &mut GenCopy, live: &[ObjectReference]) {
    let mut promoted_bytes = 0;
    let mut promoted = 0;
    for &object in live {
        plan.objects.update(object, |record| {
            if commit_forwarding(record).is_some() {
                record.age += 1;
                if record.location.region == RegionKind::Old {
                    record.generation = Generation::Old;
                    promoted_bytes += record.size;
                    promoted += 1;
                }
            }
        });
    }

    // Whatever is still young and outside the to-space is garbage.
    let to_space = plan.to_space;
    let mut reclaimed = 0;
    for (object, record) in plan.objects.records() {
        if record.generation == Generation::Young && record.location.region != to_space {
            plan.objects.remove(object);
            reclaimed += 1;
        }
    }

    let from_space = plan.from_space();
    plan.regions[RegionKind::Eden].reset();
    plan.regions[from_space].reset();
    plan.to_space = from_space;

    rebuild_remembered_set(plan);

    SharedStats::increment(&plan.stats.minor_collections);
    SharedStats::add(&plan.stats.bytes_promoted, promoted_bytes);
    plan.stats
        .update_old_space_peak(plan.regions[RegionKind::Old].used());
    info!(
        "young collection: {} survived, {} promoted ({} bytes), {} reclaimed",
        live.len() - promoted,
        promoted,
        promoted_bytes,
        reclaimed
    );
}

/// Keep exactly the old objects that reference young objects. Newly promoted objects may still
/// reference young survivors, and remembered objects may no longer reference any young object.
fn rebuild_remembered_set(plan: &GenCopy) {
    let records = plan.objects.records();
    let generations: HashMap<ObjectReference, Generation> = records
        .iter()
        .map(|(object, record)| (*object, record.generation))
        .collect();
    plan.remset.clear();
    for (object, record) in &records {
        if record.generation == Generation::Old
            && record
                .fields
                .iter()
                .any(|field| generations.get(field) == Some(&Generation::Young))
        {
            plan.remset.remember(*object);
        }
    }
    trace!("{} objects remembered", plan.remset.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::options::Options;

    fn plan(eden: usize, survivor: usize, old: usize, threshold: usize) -> GenCopy {
        let mut options = Options::default();
        options.eden_size = eden;
        options.survivor_size = survivor;
        options.old_size = old;
        options.tenuring_threshold = threshold;
        GenCopy::new(&options)
    }

    #[test]
    fn survivors_are_copied_in_breadth_first_order() {
        let mut plan = plan(100, 100, 100, 15);
        let a = plan.alloc_fast(10).unwrap();
        let b = plan.alloc_fast(20).unwrap();
        let c = plan.alloc_fast(30).unwrap();
        plan.set_fields(a, vec![c, b]).unwrap();

        collect(&mut plan, &[a]).unwrap();
        let to = plan.from_space();
        let location = |o| plan.objects.get(o).unwrap().location;
        assert_eq!(location(a), Location::new(to, 0));
        assert_eq!(location(c), Location::new(to, 10));
        assert_eq!(location(b), Location::new(to, 40));
        assert!(plan.regions[RegionKind::Eden].is_empty());
    }

    #[test]
    fn bytes_move_with_the_object() {
        let mut plan = plan(100, 100, 100, 15);
        let _garbage = plan.alloc_fast(16).unwrap();
        let a = plan.alloc_fast(4).unwrap();
        let location = plan.objects.get(a).unwrap().location;
        plan.regions[location.region].write(location.offset, b"live");

        collect(&mut plan, &[a]).unwrap();
        let location = plan.objects.get(a).unwrap().location;
        assert_eq!(location.offset, 0);
        assert_eq!(plan.regions[location.region].read(location.offset, 4), b"live");
    }

    #[test]
    fn full_to_space_promotes_early() {
        let mut plan = plan(100, 30, 100, 15);
        let a = plan.alloc_fast(20).unwrap();
        let b = plan.alloc_fast(20).unwrap();
        collect(&mut plan, &[a, b]).unwrap();
        assert_eq!(plan.objects.get(a).unwrap().generation, Generation::Young);
        let b = plan.objects.get(b).unwrap();
        assert_eq!(b.generation, Generation::Old);
        assert_eq!(b.age, 1);
    }

    #[test]
    fn failed_promotion_is_rolled_back() {
        let mut plan = plan(100, 100, 30, 1);
        let a = plan.alloc_fast(20).unwrap();
        let b = plan.alloc_fast(20).unwrap();
        let before: Vec<_> = plan.objects.records();

        let failure = collect(&mut plan, &[a, b]).unwrap_err();
        assert_eq!(failure.object, b);
        assert_eq!(failure.requested, 20);
        assert_eq!(plan.objects.records(), before);
        assert_eq!(plan.regions[RegionKind::Old].used(), 0);
        assert!(plan.regions[plan.to_space].is_empty());
        assert_eq!(plan.regions[RegionKind::Eden].used(), 40);
        assert_eq!(plan.stats.snapshot().minor_collections, 0);
    }

    #[test]
    fn remembered_objects_keep_young_objects_alive() {
        let mut plan = plan(100, 100, 100, 15);
        let young = plan.alloc_fast(8).unwrap();
        let old = plan.pretenure(8, &[]).unwrap();
        plan.set_fields(old, vec![young]).unwrap();
        assert!(plan.remset.contains(old));

        // Only the old object is a root. The young object is reached through the remembered set.
        collect(&mut plan, &[old]).unwrap();
        assert!(plan.objects.contains(young));
        assert!(plan.remset.contains(old));

        plan.set_fields(old, vec![]).unwrap();
        collect(&mut plan, &[old]).unwrap();
        assert!(!plan.objects.contains(young));
        assert!(!plan.remset.contains(old));
    }

    #[test]
    fn unreachable_remembered_objects_are_not_roots() {
        let mut plan = plan(100, 100, 100, 15);
        let dead = plan.pretenure(8, &[]).unwrap();
        let live = plan.pretenure(8, &[]).unwrap();
        let a = plan.alloc_fast(8).unwrap();
        let b = plan.alloc_fast(8).unwrap();
        plan.set_fields(dead, vec![a]).unwrap();
        plan.set_fields(live, vec![b]).unwrap();

        // live is only reachable through a young root.
        let holder = plan.alloc_fast(8).unwrap();
        plan.set_fields(holder, vec![live]).unwrap();
        collect(&mut plan, &[holder]).unwrap();

        assert!(!plan.objects.contains(a));
        assert!(plan.objects.contains(b));
        assert!(plan.remset.contains(live));
        assert!(!plan.remset.contains(dead));
        // Old garbage waits for a full collection.
        assert!(plan.objects.contains(dead));
    }
}
