//! Per-run execution context: the accumulated results of finished steps.
//!
//! `ExecutionContext` grows monotonically during a run. Only the scheduler
//! writes to it, after a step's task has been joined, so the resolver always
//! sees final dependency results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::run::{StepResult, StepStatus};

/// Completed step id -> terminal result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    results: BTreeMap<String, StepResult>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal step result.
    ///
    /// A step is recorded once per run; a second record for the same step is
    /// ignored and logged.
    pub fn record(&mut self, result: StepResult) {
        if self.results.contains_key(&result.step_id) {
            tracing::error!(step_id = %result.step_id, "step result recorded twice, keeping the first");
            return;
        }
        self.results.insert(result.step_id.clone(), result);
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.results.get(step_id).map(|r| r.status)
    }

    /// Output of a step, only if it succeeded.
    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.results
            .get(step_id)
            .filter(|r| r.is_succeeded())
            .and_then(|r| r.output.as_ref())
    }

    pub fn is_succeeded(&self, step_id: &str) -> bool {
        self.status(step_id) == Some(StepStatus::Succeeded)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.results.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results ordered by step id.
    pub fn results(&self) -> impl Iterator<Item = &StepResult> {
        self.results.values()
    }

    /// Number of steps with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Outputs of all succeeded steps as a JSON object keyed by step id.
    pub fn outputs(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .results
            .values()
            .filter(|r| r.is_succeeded())
            .filter_map(|r| r.output.clone().map(|o| (r.step_id.clone(), o)))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use weft_types::run::{SkipReason, StepFailure};

    fn sample_context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.record(StepResult::succeeded("a", "echo", json!({"v": 1}), 1, Utc::now()));
        ctx.record(StepResult::failed(
            "b",
            "fail",
            StepFailure::Skill {
                skill: "fail".into(),
                message: "boom".into(),
            },
            2,
            Utc::now(),
        ));
        ctx.record(StepResult::skipped(
            "c",
            "echo",
            SkipReason::UpstreamFailed {
                step_id: "b".into(),
            },
        ));
        ctx
    }

    #[test]
    fn test_output_only_for_succeeded_steps() {
        let ctx = sample_context();
        assert_eq!(ctx.output("a"), Some(&json!({"v": 1})));
        assert_eq!(ctx.output("b"), None);
        assert_eq!(ctx.output("c"), None);
        assert_eq!(ctx.output("missing"), None);
        assert!(ctx.is_succeeded("a"));
        assert!(!ctx.is_succeeded("b"));
    }

    #[test]
    fn test_record_keeps_first_result() {
        let mut ctx = sample_context();
        ctx.record(StepResult::succeeded("b", "fail", json!(0), 3, Utc::now()));
        assert_eq!(ctx.status("b"), Some(StepStatus::Failed));
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn test_counts_and_outputs() {
        let ctx = sample_context();
        assert_eq!(ctx.count(StepStatus::Succeeded), 1);
        assert_eq!(ctx.count(StepStatus::Skipped), 1);
        assert_eq!(ctx.outputs(), json!({"a": {"v": 1}}));
        let ids: Vec<&str> = ctx.results().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
