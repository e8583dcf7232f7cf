//! Input template AST and the `{{ steps.<id>.output... }}` reference parser.
//!
//! Step inputs are arbitrary JSON values. Strings inside them may contain
//! reference markers; everything else is a literal. Templates are compiled
//! once, at validation time, into an [`InputTemplate`] tree so the resolver
//! never re-parses strings during a run.
//!
//! Accepted forms:
//! - `{{ steps.fetch.output }}` -- the whole output of `fetch`
//! - `{{ steps.fetch.output.body.items[0].name }}` -- a field path
//! - `{{ steps.fetch.output.items.0 }}` -- numeric dot segments index arrays too
//!
//! A string that is exactly one marker resolves to the referenced JSON value
//! with its type intact. Markers embedded in other text are interpolated as
//! strings. `{{ ... }}` expressions that do not start with `steps.` are left
//! untouched as literal text.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const STEPS_PREFIX: &str = "steps.";
const OUTPUT_FIELD: &str = "output";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A reference marker that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("unterminated reference starting at '{0}'")]
    Unterminated(String),

    #[error("malformed reference '{expression}': {reason}")]
    Malformed { expression: String, reason: String },
}

impl ReferenceError {
    fn malformed(expression: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// One segment of a field path below a step's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `.name` -- an object key, or an array index when all digits.
    Key(String),
    /// `[n]` -- an array index.
    Index(usize),
}

/// A parsed reference: "output of step S at field path P".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
    pub step_id: String,
    pub path: Vec<PathSegment>,
}

impl StepRef {
    /// Path rendered back into marker syntax, starting at `output`.
    pub fn path_string(&self) -> String {
        let mut out = String::from(OUTPUT_FIELD);
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                PathSegment::Index(index) => {
                    out.push_str(&format!("[{index}]"));
                }
            }
        }
        out
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "steps.{}.{}", self.step_id, self.path_string())
    }
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Text(String),
    Ref(StepRef),
}

/// Compiled form of one input value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputTemplate {
    /// No references anywhere below this node.
    Literal(Value),
    /// A string consisting of exactly one marker.
    Reference(StepRef),
    /// A string mixing text and markers.
    Interpolated(Vec<TemplatePart>),
    Object(BTreeMap<String, InputTemplate>),
    Array(Vec<InputTemplate>),
}

impl InputTemplate {
    /// Compile a JSON value, parsing every reference marker it contains.
    pub fn compile(value: &Value) -> Result<Self, ReferenceError> {
        match value {
            Value::String(s) => parse_string(s),
            Value::Array(items) => {
                let compiled = items
                    .iter()
                    .map(InputTemplate::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                if compiled.iter().all(InputTemplate::is_literal) {
                    Ok(Self::Literal(value.clone()))
                } else {
                    Ok(Self::Array(compiled))
                }
            }
            Value::Object(map) => {
                let mut compiled = BTreeMap::new();
                for (key, item) in map {
                    compiled.insert(key.clone(), InputTemplate::compile(item)?);
                }
                if compiled.values().all(InputTemplate::is_literal) {
                    Ok(Self::Literal(value.clone()))
                } else {
                    Ok(Self::Object(compiled))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Every reference in this template, depth first.
    pub fn references(&self) -> Vec<&StepRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a StepRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(r) => out.push(r),
            Self::Interpolated(parts) => {
                for part in parts {
                    if let TemplatePart::Ref(r) = part {
                        out.push(r);
                    }
                }
            }
            Self::Object(map) => {
                for item in map.values() {
                    item.collect_references(out);
                }
            }
            Self::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_string(s: &str) -> Result<InputTemplate, ReferenceError> {
    let mut parts: Vec<TemplatePart> = Vec::new();
    let mut text = String::new();
    let mut rest = s;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            if after_open.trim_start().starts_with(STEPS_PREFIX) {
                return Err(ReferenceError::Unterminated(rest[start..].to_string()));
            }
            break;
        };

        let expression = after_open[..end].trim();
        let consumed = start + OPEN.len() + end + CLOSE.len();
        if expression.starts_with(STEPS_PREFIX) {
            text.push_str(&rest[..start]);
            if !text.is_empty() {
                parts.push(TemplatePart::Text(std::mem::take(&mut text)));
            }
            parts.push(TemplatePart::Ref(parse_expression(expression)?));
        } else {
            text.push_str(&rest[..consumed]);
        }
        rest = &rest[consumed..];
    }
    text.push_str(rest);

    if parts.is_empty() {
        return Ok(InputTemplate::Literal(Value::String(s.to_string())));
    }
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }

    if parts.len() == 1 {
        if let Some(TemplatePart::Ref(r)) = parts.pop() {
            return Ok(InputTemplate::Reference(r));
        }
    }
    Ok(InputTemplate::Interpolated(parts))
}

/// Parse `steps.<id>.output<path>` (already trimmed, without braces).
pub fn parse_expression(expression: &str) -> Result<StepRef, ReferenceError> {
    let body = expression
        .strip_prefix(STEPS_PREFIX)
        .ok_or_else(|| ReferenceError::malformed(expression, "expected 'steps.' prefix"))?;

    let (step_id, after_id) = match body.find('.') {
        Some(dot) => (&body[..dot], &body[dot + 1..]),
        None => (body, ""),
    };
    if step_id.is_empty() || !step_id.chars().all(is_step_id_char) {
        return Err(ReferenceError::malformed(expression, "invalid step id"));
    }

    let path_str = after_id
        .strip_prefix(OUTPUT_FIELD)
        .ok_or_else(|| ReferenceError::malformed(expression, "expected '.output' after step id"))?;

    let path = parse_path(path_str).map_err(|reason| ReferenceError::malformed(expression, reason))?;

    Ok(StepRef {
        step_id: step_id.to_string(),
        path,
    })
}

fn parse_path(mut rest: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err("empty path segment".to_string());
            }
            if key.chars().any(char::is_whitespace) {
                return Err(format!("whitespace in path segment '{key}'"));
            }
            segments.push(PathSegment::Key(key.to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| "unclosed '[' in path".to_string())?;
            let index = after[..end]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid array index '{}'", &after[..end]))?;
            segments.push(PathSegment::Index(index));
            rest = &after[end + 1..];
        } else {
            return Err(format!("unexpected '{rest}' after 'output'"));
        }
    }
    Ok(segments)
}

/// Characters allowed in step ids.
pub fn is_step_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_ref(id: &str, path: Vec<PathSegment>) -> StepRef {
        StepRef {
            step_id: id.to_string(),
            path,
        }
    }

    #[test]
    fn test_plain_values_are_literals() {
        for value in [json!(1), json!("hello"), json!({"a": [1, "b"]}), json!(null)] {
            assert_eq!(
                InputTemplate::compile(&value).unwrap(),
                InputTemplate::Literal(value.clone())
            );
        }
    }

    #[test]
    fn test_whole_string_reference() {
        let t = InputTemplate::compile(&json!("{{ steps.fetch.output }}")).unwrap();
        assert_eq!(t, InputTemplate::Reference(step_ref("fetch", vec![])));

        let t = InputTemplate::compile(&json!("{{steps.fetch.output.body}}")).unwrap();
        assert_eq!(
            t,
            InputTemplate::Reference(step_ref("fetch", vec![PathSegment::Key("body".into())]))
        );
    }

    #[test]
    fn test_path_with_indexes() {
        let r = parse_expression("steps.a.output.items[2].name.0").unwrap();
        assert_eq!(
            r.path,
            vec![
                PathSegment::Key("items".into()),
                PathSegment::Index(2),
                PathSegment::Key("name".into()),
                PathSegment::Key("0".into()),
            ]
        );
        assert_eq!(r.path_string(), "output.items[2].name.0");
        assert_eq!(r.to_string(), "steps.a.output.items[2].name.0");
    }

    #[test]
    fn test_interpolated_string() {
        let t = InputTemplate::compile(&json!("Hello {{ steps.user.output.name }}!")).unwrap();
        assert_eq!(
            t,
            InputTemplate::Interpolated(vec![
                TemplatePart::Text("Hello ".into()),
                TemplatePart::Ref(step_ref("user", vec![PathSegment::Key("name".into())])),
                TemplatePart::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_nested_references_are_found() {
        let t = InputTemplate::compile(&json!({
            "static": 1,
            "list": ["x", "{{ steps.a.output }}"],
            "deep": {"text": "{{ steps.b.output.v }} and {{ steps.c.output }}"}
        }))
        .unwrap();
        let ids: Vec<&str> = t.references().iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_non_step_braces_left_alone() {
        let value = json!("{{ trigger.body }} stays");
        assert_eq!(
            InputTemplate::compile(&value).unwrap(),
            InputTemplate::Literal(value.clone())
        );
        let value = json!("unclosed {{ braces");
        assert!(InputTemplate::compile(&value).unwrap().is_literal());
    }

    #[test]
    fn test_malformed_references() {
        let cases = [
            "{{ steps. }}",
            "{{ steps.a }}",
            "{{ steps.a.result }}",
            "{{ steps.a.output. }}",
            "{{ steps.a.output[x] }}",
            "{{ steps.a.output[1 }}",
            "{{ steps.a b.output }}",
        ];
        for case in cases {
            let err = InputTemplate::compile(&json!(case)).unwrap_err();
            assert!(matches!(err, ReferenceError::Malformed { .. }), "{case}: {err:?}");
        }

        let err = InputTemplate::compile(&json!("{{ steps.a.output")).unwrap_err();
        assert!(matches!(err, ReferenceError::Unterminated(_)));
    }
}
