//! Workflow definition types for Weft.
//!
//! `WorkflowDefinition` is the canonical shape a caller submits: a name and an
//! ordered list of steps, each naming a skill, its input template and the
//! steps it depends on. This module also holds the execution knobs
//! (`RetryPolicy`, `ExecutionOptions`) and the computed `ExecutionPlan`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default workflow-level timeout (30 minutes).
pub const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 1800;

/// Default step-level timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow: a named, static set of steps forming a DAG.
///
/// Read-only once validated; validation produces a `DependencyGraph` in
/// `weft-core` and never mutates the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (used in events and logs).
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Create a definition from a name and steps.
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A single step: one skill invocation with a templated input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step ID, unique within the workflow.
    pub id: String,
    /// Name of the skill this step invokes.
    pub skill: String,
    /// Parameter name -> literal JSON value or reference expression
    /// (`{{ steps.<id>.output.<path> }}`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input: BTreeMap<String, serde_json::Value>,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Step-level timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Step-level retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl StepSpec {
    /// Create a step with no input and no dependencies.
    pub fn new(id: impl Into<String>, skill: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skill: skill.into(),
            input: BTreeMap::new(),
            depends_on: Vec::new(),
            timeout_secs: None,
            retry: None,
        }
    }

    /// Add an input parameter.
    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.input.insert(name.into(), value);
        self
    }

    /// Add dependencies.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry and backoff configuration for a skill invocation.
///
/// The delay before retry `n` (1-based attempt that just failed) is
/// `base_delay * backoff_multiplier^(n-1)`, plus up to `jitter_ms` of random
/// jitter, capped at `max_delay_ms` when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 1: no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per additional retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of uniformly random jitter added to each delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    /// Cap on any single backoff delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: None,
            max_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff policy without jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff_multiplier,
            jitter_ms: None,
            max_delay_ms: None,
        }
    }

    /// Add a jitter bound.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = Some(jitter.as_millis() as u64);
        self
    }

    /// Cap individual delays.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    /// Number of attempts actually allowed (never less than one).
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn jitter(&self) -> Option<Duration> {
        self.jitter_ms.map(Duration::from_millis)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Execution Options
// ---------------------------------------------------------------------------

/// Per-run execution settings.
///
/// Defaults: one attempt, no cache, abort on first failure, 30 minute global
/// and 5 minute per-step timeouts, unbounded batch parallelism.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    /// Deadline for the whole run, measured from run start.
    pub global_timeout: Duration,
    /// Bound on each step's entire retry loop.
    pub per_step_timeout: Duration,
    /// Keep running unaffected branches after a step fails.
    pub continue_on_error: bool,
    /// Retry policy for steps without their own override.
    pub retry_policy: RetryPolicy,
    /// Result cache TTL; `None` disables caching.
    pub cache_ttl: Option<Duration>,
    /// Maximum steps running at once within a batch (`None` = whole batch).
    pub max_parallelism: Option<usize>,
    /// Reuse the engine-wide cache instead of a fresh per-run cache.
    pub share_cache_across_runs: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            global_timeout: Duration::from_secs(DEFAULT_GLOBAL_TIMEOUT_SECS),
            per_step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            continue_on_error: false,
            retry_policy: RetryPolicy::default(),
            cache_ttl: None,
            max_parallelism: None,
            share_cache_across_runs: false,
        }
    }
}

impl ExecutionOptions {
    /// Timeout for a specific step, honouring its override.
    pub fn step_timeout(&self, step: &StepSpec) -> Duration {
        step.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.per_step_timeout)
    }

    /// Retry policy for a specific step, honouring its override.
    pub fn step_retry<'a>(&'a self, step: &'a StepSpec) -> &'a RetryPolicy {
        step.retry.as_ref().unwrap_or(&self.retry_policy)
    }
}

// ---------------------------------------------------------------------------
// Execution Plan
// ---------------------------------------------------------------------------

/// Ordered batches of step IDs.
///
/// Every step appears in exactly one batch, steps within a batch are
/// independent, and a step's batch index is strictly greater than the index
/// of each of its dependencies. Steps inside a batch are sorted by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn new(batches: Vec<Vec<String>>) -> Self {
        Self { batches }
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of steps across all batches.
    pub fn step_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Index of the batch containing `step_id`.
    pub fn batch_of(&self, step_id: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|id| id == step_id))
    }

    /// Widest batch, i.e. the peak fan-out of the plan.
    pub fn max_width(&self) -> usize {
        self.batches.iter().map(Vec::len).max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
