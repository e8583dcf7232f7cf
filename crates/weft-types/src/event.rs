//! Progress events emitted while a workflow run advances.
//!
//! `ExecutionEvent` is the only thing observers see of a run in flight. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{RunFailure, SkipReason, StepFailure};

/// Events emitted by the scheduler at each state transition.
///
/// For one step the order is always `StepStarted` then exactly one of
/// `StepCompleted` / `StepFailed`; steps that never start get a single
/// `StepSkipped`. `WorkflowCompleted` / `WorkflowFailed` come last, once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A step was handed to the resilience layer.
    StepStarted {
        run_id: Uuid,
        step_id: String,
        skill: String,
        /// Index of the batch the step belongs to.
        batch: usize,
        at: DateTime<Utc>,
    },

    /// A step succeeded.
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        attempts: u32,
        cache_hit: bool,
        duration_ms: u64,
        at: DateTime<Utc>,
    },

    /// A step failed after exhausting its attempts, timing out or being cancelled.
    StepFailed {
        run_id: Uuid,
        step_id: String,
        error: StepFailure,
        attempts: u32,
        at: DateTime<Utc>,
    },

    /// A step will never run.
    StepSkipped {
        run_id: Uuid,
        step_id: String,
        reason: SkipReason,
        at: DateTime<Utc>,
    },

    /// Every step succeeded.
    WorkflowCompleted {
        run_id: Uuid,
        workflow: String,
        steps_succeeded: usize,
        duration_ms: u64,
        at: DateTime<Utc>,
    },

    /// The run ended with at least one failure, a timeout or a cancellation.
    WorkflowFailed {
        run_id: Uuid,
        workflow: String,
        /// First failure observed.
        error: RunFailure,
        /// Every step that ended `Failed`.
        failed_steps: Vec<String>,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepSkipped { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. } => *run_id,
        }
    }

    /// Step ID for step-level events, `None` for run-level events.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. }
            | Self::StepSkipped { step_id, .. } => Some(step_id),
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StepStarted { at, .. }
            | Self::StepCompleted { at, .. }
            | Self::StepFailed { at, .. }
            | Self::StepSkipped { at, .. }
            | Self::WorkflowCompleted { at, .. }
            | Self::WorkflowFailed { at, .. } => *at,
        }
    }

    /// Whether this is one of the two run-level terminal events.
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. }
        )
    }

    /// Short label used in logs and test assertions.
    pub fn label(&self) -> String {
        match self {
            Self::StepStarted { step_id, .. } => format!("StepStarted({step_id})"),
            Self::StepCompleted { step_id, .. } => format!("StepCompleted({step_id})"),
            Self::StepFailed { step_id, .. } => format!("StepFailed({step_id})"),
            Self::StepSkipped { step_id, .. } => format!("StepSkipped({step_id})"),
            Self::WorkflowCompleted { .. } => "WorkflowCompleted".to_string(),
            Self::WorkflowFailed { .. } => "WorkflowFailed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tag() {
        let event = ExecutionEvent::StepStarted {
            run_id: Uuid::nil(),
            step_id: "a".to_string(),
            skill: "echo".to_string(),
            batch: 0,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_started");
        let parsed: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_step_id_and_terminal() {
        let failed = ExecutionEvent::WorkflowFailed {
            run_id: Uuid::nil(),
            workflow: "wf".to_string(),
            error: RunFailure::GlobalTimeout { timeout_ms: 10 },
            failed_steps: vec![],
            duration_ms: 10,
            at: Utc::now(),
        };
        assert!(failed.is_run_terminal());
        assert_eq!(failed.step_id(), None);
        assert_eq!(failed.label(), "WorkflowFailed");

        let skipped = ExecutionEvent::StepSkipped {
            run_id: Uuid::nil(),
            step_id: "c".to_string(),
            reason: SkipReason::RunAborted,
            at: Utc::now(),
        };
        assert!(!skipped.is_run_terminal());
        assert_eq!(skipped.step_id(), Some("c"));
        assert_eq!(skipped.label(), "StepSkipped(c)");
    }
}
