//! Default values for the heap and the concurrent map.

/// The default Eden size in bytes.
pub const DEFAULT_EDEN_SIZE: usize = 4 << 20;
/// The default size of each survivor space in bytes.
pub const DEFAULT_SURVIVOR_SIZE: usize = 512 << 10;
/// The default old space size in bytes.
pub const DEFAULT_OLD_SIZE: usize = 16 << 20;

/// An object is promoted when it would reach this many survivals.
pub const DEFAULT_TENURING_THRESHOLD: usize = 15;
/// The largest tenuring threshold we accept. An object age fits in four bits.
pub const MAX_TENURING_THRESHOLD: usize = 15;

/// The default number of buckets in a new concurrent map.
pub const DEFAULT_MAP_CAPACITY: usize = 16;
/// The largest table we ever allocate.
pub const MAXIMUM_MAP_CAPACITY: usize = 1 << 30;
/// The map resizes when `size >= capacity * load_factor`.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;
/// A chain is converted into a tree bin when it grows to this many entries.
pub const TREEIFY_THRESHOLD: usize = 8;
/// A tree bin is converted back into a chain when it shrinks to this many entries.
pub const UNTREEIFY_THRESHOLD: usize = 6;
/// Tables smaller than this are resized rather than treeified.
pub const MIN_TREEIFY_CAPACITY: usize = 64;

const_assert!(UNTREEIFY_THRESHOLD < TREEIFY_THRESHOLD);
const_assert!(DEFAULT_MAP_CAPACITY.is_power_of_two());
const_assert!(MAXIMUM_MAP_CAPACITY.is_power_of_two());
const_assert!(MIN_TREEIFY_CAPACITY >= 4 * TREEIFY_THRESHOLD);
const_assert!(DEFAULT_TENURING_THRESHOLD <= MAX_TENURING_THRESHOLD);
