//! Collection policies of the heap regions.

pub mod region;

pub(crate) mod copyspace;
pub(crate) mod markcompactspace;
