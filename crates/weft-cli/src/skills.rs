//! Demo skills shipped with the `weft` binary so definitions can be run end
//! to end without writing code.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use weft_core::skill::{FnSkill, Skill, SkillError, SkillRegistry};
use weft_core::workflow::resolver::value_to_string;

/// Registry with every demo skill.
pub fn demo_registry() -> SkillRegistry {
    SkillRegistry::new()
        .with(FnSkill::new("echo", |input| async move { Ok::<_, SkillError>(input) }).with_version("1"))
        .with(FnSkill::new("uppercase", |input| async move { uppercase(&input) }).with_version("1"))
        .with(FnSkill::new("concat", |input| async move { concat(&input) }).with_version("1"))
        .with(FnSkill::new("sleep", sleep).with_version("1"))
        .with(FnSkill::new("fail", |input| async move { Err::<Value, _>(fail(&input)) }).with_version("1"))
        .with(FlakySkill::default())
}

/// One-line descriptions for `weft skills`.
pub fn describe(name: &str) -> &'static str {
    match name {
        "echo" => "returns its input unchanged",
        "uppercase" => "upper-cases `text`",
        "concat" => "joins `parts` with an optional `separator`",
        "sleep" => "waits `ms` milliseconds, then echoes its input",
        "fail" => "always fails with `message`",
        "flaky" => "fails its first `failures` calls (default 1), then succeeds",
        _ => "",
    }
}

fn uppercase(input: &Value) -> Result<Value, SkillError> {
    let text = input["text"]
        .as_str()
        .ok_or_else(|| SkillError::InvalidInput("expected string field `text`".into()))?;
    Ok(json!({ "text": text.to_uppercase() }))
}

fn concat(input: &Value) -> Result<Value, SkillError> {
    let parts = input["parts"]
        .as_array()
        .ok_or_else(|| SkillError::InvalidInput("expected array field `parts`".into()))?;
    let separator = input["separator"].as_str().unwrap_or("");
    let text = parts
        .iter()
        .map(value_to_string)
        .collect::<Vec<_>>()
        .join(separator);
    Ok(json!({ "text": text }))
}

async fn sleep(input: Value) -> Result<Value, SkillError> {
    let ms = input["ms"]
        .as_u64()
        .ok_or_else(|| SkillError::InvalidInput("expected integer field `ms`".into()))?;
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(input)
}

fn fail(input: &Value) -> SkillError {
    let message = input["message"].as_str().unwrap_or("requested failure");
    SkillError::failed(message)
}

/// Fails until it has been called `failures` times, counting across the
/// whole process.
#[derive(Debug, Default)]
struct FlakySkill {
    calls: AtomicU32,
}

impl Skill for FlakySkill {
    fn name(&self) -> &str {
        "flaky"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        let failures = input["failures"].as_u64().unwrap_or(1);
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if u64::from(call) <= failures {
            return Err(SkillError::failed(format!("flaky failure {call}/{failures}")));
        }
        Ok(json!({ "calls": call, "input": input }))
    }
}
