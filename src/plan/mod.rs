//! The generational plan and its write barrier.

pub(crate) mod barrier;
pub(crate) mod gencopy;
