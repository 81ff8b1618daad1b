//! Heap verification.
//!
//! With the `sanity` feature, the heap is verified after every collection and a failure panics.
//! [`Heap::verify`](crate::Heap::verify) runs the same checks on demand.

use std::collections::{HashSet, VecDeque};

use enum_map::EnumMap;
use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::plan::gencopy::GenCopy;
use crate::policy::region::RegionKind;
use crate::util::address::ObjectReference;
use crate::util::object_table::{Generation, ObjectRecord};

pub(crate) struct SanityChecker<'a> {
    plan: &'a GenCopy,
    records: Vec<(ObjectReference, ObjectRecord)>,
    /// Visited objects
    refs: HashSet<ObjectReference>,
}

impl<'a> SanityChecker<'a> {
    pub fn new(plan: &'a GenCopy) -> Self {
        SanityChecker {
            plan,
            records: plan.objects.records(),
            refs: HashSet::new(),
        }
    }

    fn check_records(&self) -> Result<(), String> {
        let to_space = self.plan.to_space;
        for (object, record) in &self.records {
            let region = record.location.region;
            if record.forwarding.is_some() {
                return Err(format!("{} is still forwarded to {:?}", object, record.forwarding));
            }
            if record.end() > self.plan.regions[region].used() {
                return Err(format!(
                    "{} at {} with {} bytes lies beyond the cursor of {} ({})",
                    object,
                    record.location,
                    record.size,
                    region,
                    self.plan.regions[region].used()
                ));
            }
            let expected = if region.is_young() {
                Generation::Young
            } else {
                Generation::Old
            };
            if record.generation != expected {
                return Err(format!("{} is {} but lives in {}", object, record.generation, region));
            }
            if region == to_space {
                return Err(format!("{} lives in the to-space {}", object, region));
            }
        }
        Ok(())
    }

    /// Objects in a region must be packed without gaps or overlaps from offset zero to the cursor.
    fn check_layout(&self) -> Result<(), String> {
        let mut by_region: EnumMap<RegionKind, Vec<(ObjectReference, &ObjectRecord)>> =
            EnumMap::default();
        for (object, record) in &self.records {
            by_region[record.location.region].push((*object, record));
        }
        for kind in RegionKind::iter() {
            let mut cursor = 0;
            for (object, record) in by_region[kind]
                .iter()
                .sorted_by_key(|(_, record)| record.location.offset)
            {
                if record.location.offset != cursor {
                    return Err(format!(
                        "{}: {} starts at {:#x}, expected {:#x}",
                        kind, object, record.location.offset, cursor
                    ));
                }
                cursor = record.end();
            }
            let used = self.plan.regions[kind].used();
            if cursor != used {
                return Err(format!(
                    "{}: objects use {} bytes, the cursor is at {}",
                    kind, cursor, used
                ));
            }
        }
        Ok(())
    }

    /// Every old object that references a young object must be remembered.
    fn check_remembered_set(&self) -> Result<(), String> {
        let young: HashSet<ObjectReference> = self
            .records
            .iter()
            .filter(|(_, record)| record.generation == Generation::Young)
            .map(|(object, _)| *object)
            .collect();
        for (object, record) in &self.records {
            if record.generation == Generation::Old
                && record.fields.iter().any(|field| young.contains(field))
                && !self.plan.remset.contains(*object)
            {
                return Err(format!(
                    "{} references young objects but is not remembered",
                    object
                ));
            }
        }
        Ok(())
    }

    /// No object reachable from the roots may reference a reclaimed object.
    fn check_reachable(&mut self, roots: &[ObjectReference]) -> Result<(), String> {
        let mut queue: VecDeque<ObjectReference> = VecDeque::new();
        for &root in roots {
            if self.refs.insert(root) {
                queue.push_back(root);
            }
        }
        while let Some(object) = queue.pop_front() {
            let Some(record) = self.plan.objects.get(object) else {
                return Err(format!("{} is reachable but was reclaimed", object));
            };
            for field in record.fields {
                if self.refs.insert(field) {
                    queue.push_back(field);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn verify_heap(plan: &GenCopy, roots: Option<&[ObjectReference]>) -> Result<(), String> {
    let mut checker = SanityChecker::new(plan);
    checker.check_records()?;
    checker.check_layout()?;
    checker.check_remembered_set()?;
    if let Some(roots) = roots {
        checker.check_reachable(roots)?;
    }
    trace!(
        "heap verified: {} objects, {} reachable from the roots",
        checker.records.len(),
        checker.refs.len()
    );
    Ok(())
}
