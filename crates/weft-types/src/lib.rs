//! Shared domain types for Weft.
//!
//! Workflow definitions, execution options, step/run results, progress events
//! and engine configuration. Zero runtime dependencies -- only serde, uuid,
//! chrono, thiserror.

pub mod config;
pub mod event;
pub mod run;
pub mod workflow;
