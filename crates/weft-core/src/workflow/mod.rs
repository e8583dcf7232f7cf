//! Workflow orchestration.
//!
//! - `definition`: loading and validating workflow definitions
//! - `reference`: input template syntax and parsing
//! - `dag`: dependency graph, cycle detection and batch planning
//! - `context`: per-run step results
//! - `resolver`: template evaluation against the context
//! - `retry`, `cache`, `resilience`: guarded skill invocation
//! - `executor`: the batch scheduler and `WorkflowEngine`

pub mod cache;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod reference;
pub mod resilience;
pub mod resolver;
pub mod retry;

pub use context::ExecutionContext;
pub use dag::DependencyGraph;
pub use definition::{ValidationError, WorkflowError, load_workflow_file, validate};
pub use executor::{RunHandle, RunOutcome, SubmitError, WorkflowEngine};
