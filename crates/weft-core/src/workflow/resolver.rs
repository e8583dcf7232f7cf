//! Variable resolver: evaluates compiled input templates against the
//! results accumulated in an [`ExecutionContext`].
//!
//! Resolution is total and synchronous. It reads only outputs of steps that
//! succeeded; any other state is an `Unresolved` error naming the step and
//! the path that was requested.

use std::collections::BTreeMap;

use serde_json::Value;

use super::context::ExecutionContext;
use super::reference::{InputTemplate, PathSegment, StepRef, TemplatePart};

/// A reference whose target is missing, not succeeded, or lacks the path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unresolved reference to step '{step_id}' at path '{path}'")]
    Unresolved { step_id: String, path: String },
}

impl ResolveError {
    fn unresolved(r: &StepRef) -> Self {
        Self::Unresolved {
            step_id: r.step_id.clone(),
            path: r.path_string(),
        }
    }
}

/// Resolve a step's full input map into the JSON object handed to its skill.
pub fn resolve_input(
    input: &BTreeMap<String, InputTemplate>,
    context: &ExecutionContext,
) -> Result<Value, ResolveError> {
    let mut map = serde_json::Map::new();
    for (name, template) in input {
        map.insert(name.clone(), resolve(template, context)?);
    }
    Ok(Value::Object(map))
}

/// Resolve a single template. Literals pass through unchanged.
pub fn resolve(template: &InputTemplate, context: &ExecutionContext) -> Result<Value, ResolveError> {
    match template {
        InputTemplate::Literal(value) => Ok(value.clone()),
        InputTemplate::Reference(r) => lookup(r, context).cloned(),
        InputTemplate::Interpolated(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Ref(r) => out.push_str(&value_to_string(lookup(r, context)?)),
                }
            }
            Ok(Value::String(out))
        }
        InputTemplate::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), resolve(item, context)?);
            }
            Ok(Value::Object(out))
        }
        InputTemplate::Array(items) => items
            .iter()
            .map(|item| resolve(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn lookup<'a>(r: &StepRef, context: &'a ExecutionContext) -> Result<&'a Value, ResolveError> {
    let mut current = context
        .output(&r.step_id)
        .ok_or_else(|| ResolveError::unresolved(r))?;

    for segment in &r.path {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        };
        current = next.ok_or_else(|| ResolveError::unresolved(r))?;
    }
    Ok(current)
}

/// String form used when a value is interpolated into text: strings raw,
/// everything else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use weft_types::run::{StepFailure, StepResult};

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.record(StepResult::succeeded(
            "fetch",
            "http",
            json!({"status": 200, "items": [{"name": "first"}, {"name": "second"}]}),
            1,
            Utc::now(),
        ));
        ctx.record(StepResult::failed(
            "broken",
            "http",
            StepFailure::Timeout { timeout_ms: 10 },
            1,
            Utc::now(),
        ));
        ctx
    }

    fn compile(value: Value) -> InputTemplate {
        InputTemplate::compile(&value).unwrap()
    }

    #[test]
    fn test_literal_passes_through() {
        let t = compile(json!({"a": [1, 2], "b": "text"}));
        assert_eq!(resolve(&t, &context()).unwrap(), json!({"a": [1, 2], "b": "text"}));
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let ctx = context();
        let t = compile(json!("{{ steps.fetch.output.status }}"));
        assert_eq!(resolve(&t, &ctx).unwrap(), json!(200));

        let t = compile(json!("{{ steps.fetch.output.items }}"));
        assert_eq!(resolve(&t, &ctx).unwrap()[1]["name"], json!("second"));

        let t = compile(json!("{{ steps.fetch.output.items[1].name }}"));
        assert_eq!(resolve(&t, &ctx).unwrap(), json!("second"));

        let t = compile(json!("{{ steps.fetch.output.items.0.name }}"));
        assert_eq!(resolve(&t, &ctx).unwrap(), json!("first"));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let t = compile(json!("got {{ steps.fetch.output.status }}: {{ steps.fetch.output.items[0] }}"));
        assert_eq!(
            resolve(&t, &context()).unwrap(),
            json!(r#"got 200: {"name":"first"}"#)
        );
    }

    #[test]
    fn test_nested_structures_resolve() {
        let t = compile(json!({
            "names": ["{{ steps.fetch.output.items[0].name }}", "fixed"],
            "meta": {"code": "{{ steps.fetch.output.status }}"}
        }));
        assert_eq!(
            resolve(&t, &context()).unwrap(),
            json!({"names": ["first", "fixed"], "meta": {"code": 200}})
        );
    }

    #[test]
    fn test_failed_or_missing_step_is_unresolved() {
        let ctx = context();
        let err = resolve(&compile(json!("{{ steps.broken.output }}")), &ctx).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Unresolved {
                step_id: "broken".into(),
                path: "output".into()
            }
        );
        assert!(resolve(&compile(json!("{{ steps.nope.output }}")), &ctx).is_err());
    }

    #[test]
    fn test_missing_path_is_unresolved() {
        let ctx = context();
        let err = resolve(&compile(json!("{{ steps.fetch.output.items[5].name }}")), &ctx)
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Unresolved {
                step_id: "fetch".into(),
                path: "output.items[5].name".into()
            }
        );
        assert!(resolve(&compile(json!("{{ steps.fetch.output.status.x }}")), &ctx).is_err());
    }

    #[test]
    fn test_resolve_input_builds_object() {
        let mut input = BTreeMap::new();
        input.insert("code".to_string(), compile(json!("{{ steps.fetch.output.status }}")));
        input.insert("label".to_string(), compile(json!("static")));
        assert_eq!(
            resolve_input(&input, &context()).unwrap(),
            json!({"code": 200, "label": "static"})
        );
    }
}
