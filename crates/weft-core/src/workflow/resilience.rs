//! Resilience layer: cache lookup, retry with backoff, and a per-step timeout
//! around a single skill invocation.
//!
//! Independent of graph structure and emits no events; the scheduler turns
//! the returned `StepResult` into events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use weft_types::run::{StepFailure, StepResult};
use weft_types::workflow::RetryPolicy;

use super::cache::{CacheKey, ResultCache};
use super::retry::RetryHandler;
use crate::skill::{BoxSkill, SkillError};

/// Effective settings for one step invocation.
#[derive(Debug, Clone)]
pub struct StepSettings {
    pub retry: RetryPolicy,
    /// Bound on the whole retry loop, including backoff waits.
    pub timeout: Duration,
    /// `None` disables caching for this invocation.
    pub cache_ttl: Option<Duration>,
}

/// Wraps skill invocations with caching, retries and a timeout.
///
/// Cloning shares the underlying cache.
#[derive(Debug, Clone)]
pub struct ResilienceLayer {
    cache: Arc<ResultCache>,
}

impl ResilienceLayer {
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self { cache }
    }

    /// Invoke `skill` for `step_id` and return its terminal result.
    ///
    /// 1. A live cache entry short-circuits with zero attempts.
    /// 2. Failures are retried per `settings.retry`, sleeping between attempts.
    /// 3. The timeout covers the entire loop; on expiry the in-flight skill
    ///    future is dropped and the step fails with `Timeout`.
    /// 4. Cancelling `cancel` drops the in-flight future and fails the step
    ///    with `Cancelled`.
    pub async fn invoke(
        &self,
        step_id: &str,
        skill: &BoxSkill,
        input: Value,
        settings: &StepSettings,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let key = settings
            .cache_ttl
            .map(|_| CacheKey::new(skill.name(), skill.version(), &input));

        if let Some(key) = &key {
            if let Some(output) = self.cache.get(key) {
                tracing::debug!(step_id, skill = skill.name(), "cache hit");
                return StepResult::cached(step_id, skill.name(), output, started_at);
            }
        }

        let mut attempts = 0u32;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(
                settings.timeout,
                Self::attempt_loop(step_id, skill, &input, &settings.retry, &mut attempts),
            ) => Some(result),
        };

        match outcome {
            None => StepResult::failed(
                step_id,
                skill.name(),
                StepFailure::Cancelled {
                    reason: "cancelled before completion".to_string(),
                },
                attempts,
                started_at,
            ),
            Some(Err(_elapsed)) => {
                tracing::warn!(
                    step_id,
                    skill = skill.name(),
                    attempts,
                    timeout_ms = settings.timeout.as_millis() as u64,
                    "step timed out"
                );
                StepResult::failed(
                    step_id,
                    skill.name(),
                    StepFailure::Timeout {
                        timeout_ms: settings.timeout.as_millis() as u64,
                    },
                    attempts,
                    started_at,
                )
            }
            Some(Ok(Err(error))) => StepResult::failed(
                step_id,
                skill.name(),
                StepFailure::Skill {
                    skill: skill.name().to_string(),
                    message: error.to_string(),
                },
                attempts,
                started_at,
            ),
            Some(Ok(Ok(output))) => {
                if let (Some(key), Some(ttl)) = (key, settings.cache_ttl) {
                    self.cache.insert(key, output.clone(), ttl);
                }
                StepResult::succeeded(step_id, skill.name(), output, attempts, started_at)
            }
        }
    }

    async fn attempt_loop(
        step_id: &str,
        skill: &BoxSkill,
        input: &Value,
        policy: &RetryPolicy,
        attempts: &mut u32,
    ) -> Result<Value, SkillError> {
        loop {
            *attempts += 1;
            let attempt = *attempts;
            match skill.invoke(input.clone()).await {
                Ok(output) => return Ok(output),
                Err(error) if RetryHandler::should_retry(policy, attempt) => {
                    let delay = RetryHandler::jittered_delay(policy, attempt);
                    tracing::warn!(
                        step_id,
                        skill = skill.name(),
                        attempt,
                        max_attempts = policy.effective_max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "skill failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::debug!(step_id, skill = skill.name(), attempt, error = %error, "skill failed, attempts exhausted");
                    return Err(error);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
