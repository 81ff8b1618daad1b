use std::sync::atomic::{AtomicUsize, Ordering};

use enum_map::Enum;
use strum_macros::{Display, EnumIter};

use crate::util::error::InsufficientSpace;

/// The regions of the heap.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Enum, Display, EnumIter)]
pub enum RegionKind {
    #[strum(serialize = "eden")]
    Eden,
    #[strum(serialize = "survivor0")]
    Survivor0,
    #[strum(serialize = "survivor1")]
    Survivor1,
    #[strum(serialize = "old")]
    Old,
}

impl RegionKind {
    pub fn is_survivor(self) -> bool {
        matches!(self, RegionKind::Survivor0 | RegionKind::Survivor1)
    }

    pub fn is_young(self) -> bool {
        self != RegionKind::Old
    }
}

/// How much of a region is in use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionUsage {
    pub used: usize,
    pub capacity: usize,
}

/// A fixed-size byte region with a bump pointer.
///
/// Objects are never freed individually. A region is emptied as a whole by [`Region::reset`], or cut
/// back to a lower cursor by [`Region::reset_cursor`] after compaction. Memory above the cursor is
/// always zero.
pub(crate) struct Region {
    kind: RegionKind,
    memory: Box<[u8]>,
    cursor: AtomicUsize,
}

impl Region {
    pub fn new(kind: RegionKind, capacity: usize) -> Self {
        Region {
            kind,
            memory: vec![0u8; capacity].into_boxed_slice(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    pub fn usage(&self) -> RegionUsage {
        RegionUsage {
            used: self.used(),
            capacity: self.capacity(),
        }
    }

    /// Bump-allocate `size` bytes and return the offset of the allocation. This can be called by
    /// multiple mutators at the same time. A failed attempt does not move the cursor.
    pub fn try_allocate(&self, size: usize) -> Result<usize, InsufficientSpace> {
        let mut old = self.cursor.load(Ordering::Relaxed);
        loop {
            let new = match old.checked_add(size) {
                Some(new) if new <= self.capacity() => new,
                _ => {
                    trace!(
                        "{}: cannot bump {} bytes at {} (capacity {})",
                        self.kind,
                        size,
                        old,
                        self.capacity()
                    );
                    return Err(InsufficientSpace {
                        region: self.kind,
                        requested: size,
                        available: self.capacity() - old,
                    });
                }
            };
            match self
                .cursor
                .compare_exchange_weak(old, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return Ok(old),
                Err(current) => old = current,
            }
        }
    }

    /// Empty the region. The caller must make sure that no live object remains here.
    pub fn reset(&mut self) {
        self.reset_cursor(0);
    }

    /// Move the cursor back to `offset` and zero everything above it.
    pub fn reset_cursor(&mut self, offset: usize) {
        let used = *self.cursor.get_mut();
        debug_assert!(
            offset <= used,
            "{}: cannot reset cursor forward from {} to {}",
            self.kind,
            used,
            offset
        );
        self.memory[offset..used].fill(0);
        *self.cursor.get_mut() = offset;
    }

    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.memory[offset..offset + len]
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.used());
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Slide `len` bytes from `from` down to `to` inside this region.
    pub fn move_within(&mut self, from: usize, to: usize, len: usize) {
        debug_assert!(to <= from);
        self.memory.copy_within(from..from + len, to);
    }
}
