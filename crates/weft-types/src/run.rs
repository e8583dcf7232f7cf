//! Execution tracking types: step results, failure details and the step/run
//! state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Step state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a single step within a run.
///
/// `Pending -> Running -> {Succeeded | Failed | Skipped}`, plus
/// `Pending -> Skipped` for steps that never start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: StepState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Lifecycle state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planned,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Planned, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Terminal status recorded in a `StepResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl From<StepStatus> for StepState {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Succeeded => StepState::Succeeded,
            StepStatus::Failed => StepState::Failed,
            StepStatus::Skipped => StepState::Skipped,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// The skill returned an error on its last attempt.
    #[error("skill '{skill}' failed: {message}")]
    Skill { skill: String, message: String },

    /// The step's retry loop did not finish within its timeout.
    #[error("step timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// An input reference could not be resolved (engine ordering bug).
    #[error("unresolved reference to step '{step_id}' at path '{path}'")]
    UnresolvedReference { step_id: String, path: String },

    /// The step was cancelled while running (run aborted).
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },
}

/// Why a step was skipped without running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A (transitive) dependency did not succeed.
    UpstreamFailed { step_id: String },
    /// The run aborted before this step was reached.
    RunAborted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamFailed { step_id } => write!(f, "upstream step '{step_id}' did not succeed"),
            Self::RunAborted => f.write_str("run aborted"),
        }
    }
}

/// Terminal result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// Skill the step invoked.
    pub skill: String,
    pub status: StepStatus,
    /// Skill output (only for succeeded steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail (only for failed steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    /// Skip detail (only for skipped steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Number of skill invocations made (0 for cache hits and skipped steps).
    pub attempts: u32,
    /// Output was served from the result cache.
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn succeeded(
        step_id: impl Into<String>,
        skill: impl Into<String>,
        output: Value,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            skill: skill.into(),
            status: StepStatus::Succeeded,
            output: Some(output),
            error: None,
            skip_reason: None,
            attempts,
            cache_hit: false,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// A succeeded result served from the cache: zero attempts.
    pub fn cached(
        step_id: impl Into<String>,
        skill: impl Into<String>,
        output: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache_hit: true,
            ..Self::succeeded(step_id, skill, output, 0, started_at)
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        skill: impl Into<String>,
        error: StepFailure,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            skill: skill.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            skip_reason: None,
            attempts,
            cache_hit: false,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    pub fn skipped(
        step_id: impl Into<String>,
        skill: impl Into<String>,
        reason: SkipReason,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            skill: skill.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            skip_reason: Some(reason),
            attempts: 0,
            cache_hit: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    /// Wall-clock duration between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// A step reached `Failed`; carries its last error and attempt count.
    #[error("step '{step_id}' failed after {attempts} attempt(s): {error}")]
    StepFailed {
        step_id: String,
        error: StepFailure,
        attempts: u32,
    },

    /// The run's global deadline passed.
    #[error("workflow timed out after {timeout_ms} ms")]
    GlobalTimeout { timeout_ms: u64 },

    /// The run was cancelled by its submitter.
    #[error("workflow cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
