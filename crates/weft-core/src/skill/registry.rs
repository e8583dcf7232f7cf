//! Skill capability trait and the explicit registry handed to the engine.
//!
//! Skills are opaque: the engine only knows a skill's name, its version and
//! that `invoke` turns a JSON input into a JSON output or an error. Dynamic
//! dispatch uses a blanket impl over an object-safe twin trait:
//! 1. `Skill` uses RPITIT for its async method
//! 2. object-safe `SkillDyn` with boxed futures, blanket-implemented for every `Skill`
//! 3. `BoxSkill` wraps `Box<dyn SkillDyn>` and delegates

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

// ---------------------------------------------------------------------------
// SkillError
// ---------------------------------------------------------------------------

/// Error returned by a skill invocation. Every variant is retried per policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillError {
    /// The input did not have the shape the skill expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The skill ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl SkillError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// Skill trait
// ---------------------------------------------------------------------------

/// A reusable unit of work with a structured input/output contract.
///
/// Implementations must be safely callable concurrently for distinct
/// invocations and must not depend on ordering with other skills.
pub trait Skill: Send + Sync {
    /// Registry name, referenced by `StepSpec::skill`.
    fn name(&self) -> &str;

    /// Behavioural version; part of the result cache key so a changed skill
    /// never serves stale cached outputs.
    fn version(&self) -> &str {
        "0"
    }

    /// Run the skill.
    fn invoke(&self, input: Value) -> impl Future<Output = Result<Value, SkillError>> + Send;
}

/// Object-safe version of [`Skill`] with boxed futures.
pub trait SkillDyn: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn invoke_boxed(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, SkillError>> + Send + '_>>;
}

impl<T: Skill> SkillDyn for T {
    fn name(&self) -> &str {
        Skill::name(self)
    }

    fn version(&self) -> &str {
        Skill::version(self)
    }

    fn invoke_boxed(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, SkillError>> + Send + '_>> {
        Box::pin(self.invoke(input))
    }
}

/// Type-erased skill for storage in the registry.
pub struct BoxSkill {
    inner: Box<dyn SkillDyn>,
}

impl BoxSkill {
    pub fn new<S: Skill + 'static>(skill: S) -> Self {
        Self {
            inner: Box::new(skill),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn version(&self) -> &str {
        self.inner.version()
    }

    pub async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
        self.inner.invoke_boxed(input).await
    }
}

impl std::fmt::Debug for BoxSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxSkill")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FnSkill
// ---------------------------------------------------------------------------

/// A skill backed by an async closure.
pub struct FnSkill<F> {
    name: String,
    version: String,
    func: F,
}

impl<F, Fut> FnSkill<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, SkillError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            version: "0".to_string(),
            func,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl<F, Fut> Skill for FnSkill<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, SkillError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn invoke(&self, input: Value) -> impl Future<Output = Result<Value, SkillError>> + Send {
        (self.func)(input)
    }
}

// ---------------------------------------------------------------------------
// SkillRegistry
// ---------------------------------------------------------------------------

/// Name -> skill lookup passed into the engine at construction.
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<BoxSkill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill under its own name, returning any skill it replaced.
    pub fn register<S: Skill + 'static>(&mut self, skill: S) -> Option<Arc<BoxSkill>> {
        let boxed = BoxSkill::new(skill);
        let name = boxed.name().to_string();
        let replaced = self.skills.insert(name.clone(), Arc::new(boxed));
        if replaced.is_some() {
            tracing::warn!(skill = name.as_str(), "replacing registered skill");
        }
        replaced
    }

    /// Builder-style registration.
    pub fn with<S: Skill + 'static>(mut self, skill: S) -> Self {
        self.register(skill);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxSkill>> {
        self.skills.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// Registered skill names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl Skill for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn version(&self) -> &str {
            "2"
        }

        async fn invoke(&self, input: Value) -> Result<Value, SkillError> {
            let text = input["text"]
                .as_str()
                .ok_or_else(|| SkillError::InvalidInput("missing 'text'".to_string()))?;
            Ok(json!(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_name() {
        let registry = SkillRegistry::new().with(Upper);
        let skill = registry.get("upper").unwrap();
        assert_eq!(skill.version(), "2");

        let out = skill.invoke(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!("HI"));

        let err = skill.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, SkillError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fn_skill() {
        let registry = SkillRegistry::new()
            .with(FnSkill::new("echo", |input| async move { Ok::<_, SkillError>(input) }).with_version("1"));
        let skill = registry.get("echo").unwrap();
        assert_eq!(skill.name(), "echo");
        assert_eq!(skill.version(), "1");
        assert_eq!(skill.invoke(json!([1, 2])).await.unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_register_replaces_and_lists_sorted() {
        let mut registry = SkillRegistry::new();
        assert!(registry.is_empty());
        registry.register(FnSkill::new("b", |v| async move { Ok::<_, SkillError>(v) }));
        registry.register(Upper);
        let replaced = registry.register(FnSkill::new("b", |v| async move { Ok::<_, SkillError>(v) }));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["b", "upper"]);
        assert!(registry.contains("upper"));
        assert!(registry.get("missing").is_none());
    }
}
