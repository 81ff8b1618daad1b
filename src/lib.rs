//! A miniature managed-memory runtime.
//!
//! The crate contains two subsystems:
//!
//! * A generational heap simulator. New objects are bump-allocated in Eden. When Eden is exhausted,
//!   a copying collector evacuates live objects into a survivor semispace, or promotes them into
//!   the old space once they have survived `tenuring_threshold` collections. The old space is
//!   collected by a sliding mark-compact collector, which runs when a promotion does not fit.
//!   See [`Heap`] and [`HeapBuilder`].
//! * A concurrent hash map with lock-free reads, compare-and-swap insertion into empty buckets,
//!   per-bucket locks for all other writes, and a bucket-by-bucket resize. See [`ConcurrentMap`].
//!   The heap uses it as its object table and its remembered set.
//!
//! The heap does not manage real memory. Regions are byte buffers, objects are records with a size
//! and a list of references, and the caller supplies the root set at every allocation.

#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

mod heap;
pub use heap::{Heap, HeapBuilder};

pub(crate) mod plan;
pub(crate) mod policy;
pub mod util;

pub use crate::policy::region::{RegionKind, RegionUsage};
pub use crate::util::address::{Location, ObjectReference};
pub use crate::util::concurrent_map::{ConcurrentMap, InvalidArgument, MapConfig, Nullable};
pub use crate::util::error::HeapError;
pub use crate::util::object_table::{Generation, ObjectInfo};
pub use crate::util::options::Options;
pub use crate::util::statistics::HeapStats;
