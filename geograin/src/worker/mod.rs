//! Single-flight worker primitives.
//!
//! - [`SingleFlightScheduler`]: closure-driven, generic over the cycle error.
//! - [`BatchWorker`]: drives a [`BatchWork`] trait object.

mod batch;
mod scheduler;

pub use batch::{BatchWork, BatchWorker};
pub use scheduler::{CycleHandle, SingleFlightScheduler};
