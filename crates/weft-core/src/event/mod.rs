//! Ordered progress events for workflow runs.
//!
//! The scheduler is the only producer. Consumers subscribe through an
//! `EventEmitter` and read an `EventStream`; a slow consumer loses the oldest
//! buffered events instead of stalling the run.

pub mod bus;

pub use bus::{EventEmitter, EventStream};
