//! Utilities shared by the heap and the concurrent map.

pub mod address;
pub mod concurrent_map;
pub mod constants;
pub mod error;
pub mod logger;
pub(crate) mod object_forwarding;
pub mod object_table;
pub mod options;
pub(crate) mod sanity;
pub mod statistics;
#[cfg(test)]
pub(crate) mod test_util;
