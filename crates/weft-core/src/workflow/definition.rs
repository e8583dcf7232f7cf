//! Workflow definition parsing and validation.
//!
//! Converts YAML/JSON documents into the canonical `WorkflowDefinition` and
//! validates it into a [`DependencyGraph`]. Validation is pure: it never
//! touches a skill and reports the first problem it finds.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use thiserror::Error;
use weft_types::workflow::{StepSpec, WorkflowDefinition};

use super::dag::{CompiledStep, DependencyGraph, find_cycle};
use super::reference::{InputTemplate, ReferenceError, is_step_id_char};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Structural problem in a workflow definition. Fatal, reported before any
/// step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle: {}", .steps.join(" -> "))]
    Cycle { steps: Vec<String> },

    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must have at least one step")]
    NoSteps,

    #[error("invalid step id '{0}' (only alphanumerics, '-' and '_' allowed)")]
    InvalidStepId(String),

    #[error("step '{step}' has a zero timeout")]
    ZeroTimeout { step: String },

    #[error("step '{step}' has an invalid retry policy: {reason}")]
    InvalidRetryPolicy { step: String, reason: String },

    #[error("step '{step}' input '{param}': {error}")]
    InvalidReference {
        step: String,
        param: String,
        error: ReferenceError,
    },

    #[error("step '{step}' references unknown step '{target}'")]
    UnknownReference { step: String, target: String },

    #[error("step '{step}' references step '{target}' which it does not depend on")]
    UndeclaredReference { step: String, target: String },
}

/// Errors loading a workflow document.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Deserialize a YAML document. Call [`validate`] before executing it.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Deserialize a JSON document. Call [`validate`] before executing it.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Load a definition from disk; `.json` files are parsed as JSON, anything
/// else as YAML.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a definition and build its dependency graph.
///
/// Checks, in order:
/// 1. step ids are unique
/// 2. every `depends_on` names a declared step
/// 3. the dependency relation is acyclic
/// 4. the workflow has a name and at least one step
/// 5. step ids use only `[A-Za-z0-9_-]`, timeouts are non-zero, retry
///    policies are sane
/// 6. every input reference parses, names a declared step, and names a
///    transitive dependency of the referencing step
pub fn validate(def: &WorkflowDefinition) -> Result<DependencyGraph, ValidationError> {
    let mut seen = HashSet::new();
    for step in &def.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStep(step.id.clone()));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Some(steps) = find_cycle(&def.steps) {
        return Err(ValidationError::Cycle { steps });
    }

    if def.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if def.steps.is_empty() {
        return Err(ValidationError::NoSteps);
    }
    for step in &def.steps {
        validate_step_fields(step)?;
    }

    let compiled = def
        .steps
        .iter()
        .map(compile_step)
        .collect::<Result<Vec<_>, _>>()?;
    let graph = DependencyGraph::build(&def.name, compiled)?;

    for step in graph.steps() {
        let ancestors = graph.ancestors(step.id());
        for template in step.input.values() {
            for reference in template.references() {
                let target = reference.step_id.as_str();
                if !graph.contains(target) {
                    return Err(ValidationError::UnknownReference {
                        step: step.id().to_string(),
                        target: target.to_string(),
                    });
                }
                if !ancestors.contains(target) {
                    return Err(ValidationError::UndeclaredReference {
                        step: step.id().to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }
    }

    tracing::debug!(
        workflow = %def.name,
        steps = graph.len(),
        "workflow definition validated"
    );
    Ok(graph)
}

fn validate_step_fields(step: &StepSpec) -> Result<(), ValidationError> {
    if step.id.is_empty() || !step.id.chars().all(is_step_id_char) {
        return Err(ValidationError::InvalidStepId(step.id.clone()));
    }
    if step.timeout_secs == Some(0) {
        return Err(ValidationError::ZeroTimeout {
            step: step.id.clone(),
        });
    }
    if let Some(retry) = &step.retry {
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 0.0 {
            return Err(ValidationError::InvalidRetryPolicy {
                step: step.id.clone(),
                reason: format!("backoff multiplier {} is not a non-negative number", retry.backoff_multiplier),
            });
        }
    }
    Ok(())
}

fn compile_step(step: &StepSpec) -> Result<CompiledStep, ValidationError> {
    let mut input = BTreeMap::new();
    for (param, value) in &step.input {
        let template =
            InputTemplate::compile(value).map_err(|error| ValidationError::InvalidReference {
                step: step.id.clone(),
                param: param.clone(),
                error,
            })?;
        input.insert(param.clone(), template);
    }
    Ok(CompiledStep {
        spec: step.clone(),
        input,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::workflow::RetryPolicy;

    fn step(id: &str, depends_on: &[&str]) -> StepSpec {
        StepSpec::new(id, "echo").depends_on(depends_on.iter().copied())
    }

    fn workflow(steps: Vec<StepSpec>) -> WorkflowDefinition {
        WorkflowDefinition::new("test-wf", steps)
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_yaml_and_validate() {
        let yaml = r#"
name: digest
description: fetch then summarize
steps:
  - id: fetch
    skill: http-get
    input:
      url: https://example.com
  - id: summarize
    skill: summarizer
    depends_on: [fetch]
    input:
      text: "{{ steps.fetch.output.body }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        assert_eq!(def.description.as_deref(), Some("fetch then summarize"));
        let graph = validate(&def).unwrap();
        assert_eq!(graph.name(), "digest");
        assert_eq!(graph.plan().len(), 2);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"name": "j", "steps": [{"id": "a", "skill": "echo", "input": {"v": 1}}]}"#;
        let def = parse_workflow_json(json).unwrap();
        assert_eq!(def.steps[0].input["v"], json!(1));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_workflow_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
        let err = parse_workflow_json("{\"name\": \"x\"}").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
    }

    #[test]
    fn test_load_workflow_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("wf.yaml");
        std::fs::write(&yaml_path, "name: y\nsteps:\n  - id: a\n    skill: echo\n").unwrap();
        assert_eq!(load_workflow_file(&yaml_path).unwrap().name, "y");

        let json_path = dir.path().join("wf.json");
        std::fs::write(&json_path, r#"{"name": "j", "steps": []}"#).unwrap();
        assert_eq!(load_workflow_file(&json_path).unwrap().name, "j");

        let err = load_workflow_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::Io(_)));
    }

    // -----------------------------------------------------------------------
    // Structural checks
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_duplicate_step_ids() {
        let def = workflow(vec![step("a", &[]), step("b", &[]), step("a", &[])]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::DuplicateStep("a".into())
        );
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let def = workflow(vec![step("a", &[]), step("b", &["ghost"])]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::UnknownDependency {
                step: "b".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_rejects_cycle_naming_steps() {
        let def = workflow(vec![step("x", &["y"]), step("y", &["x"])]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::Cycle {
                steps: vec!["x".into(), "y".into()]
            }
        );
    }

    #[test]
    fn test_duplicate_checked_before_cycle() {
        let def = workflow(vec![step("x", &["x"]), step("x", &[])]);
        assert!(matches!(
            validate(&def).unwrap_err(),
            ValidationError::DuplicateStep(_)
        ));
    }

    #[test]
    fn test_rejects_empty_name_and_no_steps() {
        let mut def = workflow(vec![step("a", &[])]);
        def.name = "  ".into();
        assert_eq!(validate(&def).unwrap_err(), ValidationError::EmptyName);

        let def = workflow(vec![]);
        assert_eq!(validate(&def).unwrap_err(), ValidationError::NoSteps);
    }

    #[test]
    fn test_rejects_bad_step_fields() {
        let def = workflow(vec![step("has space", &[])]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::InvalidStepId("has space".into())
        );

        let mut s = step("a", &[]);
        s.timeout_secs = Some(0);
        assert!(matches!(
            validate(&workflow(vec![s])).unwrap_err(),
            ValidationError::ZeroTimeout { .. }
        ));

        let mut s = step("a", &[]);
        s.retry = Some(RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..RetryPolicy::default()
        });
        assert!(matches!(
            validate(&workflow(vec![s])).unwrap_err(),
            ValidationError::InvalidRetryPolicy { .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Reference checks
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_malformed_reference() {
        let def = workflow(vec![
            step("a", &[]),
            step("b", &["a"]).with_input("x", json!("{{ steps.a.result }}")),
        ]);
        let err = validate(&def).unwrap_err();
        assert!(
            matches!(&err, ValidationError::InvalidReference { step, param, .. } if step == "b" && param == "x"),
            "got {err:?}"
        );
    }

    #[test]
    fn test_rejects_reference_to_unknown_step() {
        let def = workflow(vec![
            step("a", &[]).with_input("x", json!("{{ steps.ghost.output }}")),
        ]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::UnknownReference {
                step: "a".into(),
                target: "ghost".into()
            }
        );
    }

    #[test]
    fn test_rejects_reference_outside_dependencies() {
        // b and c are siblings: c may not read b's output.
        let def = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]).with_input("x", json!("{{ steps.b.output }}")),
        ]);
        assert_eq!(
            validate(&def).unwrap_err(),
            ValidationError::UndeclaredReference {
                step: "c".into(),
                target: "b".into()
            }
        );
    }

    #[test]
    fn test_accepts_transitive_reference() {
        let def = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]).with_input("x", json!({"deep": ["{{ steps.a.output.v }}"]})),
        ]);
        let graph = validate(&def).unwrap();
        assert_eq!(graph.step("c").unwrap().input["x"].references().len(), 1);
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::Cycle {
            steps: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: x -> y");
    }
}
