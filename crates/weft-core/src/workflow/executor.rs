//! Batch-based parallel DAG executor.
//!
//! `WorkflowEngine` validates a definition, plans it into batches, and runs
//! each batch concurrently through the resilience layer. Between batches the
//! scheduler merges step results into the run's `ExecutionContext`, which is
//! the only place later steps read their inputs from.
//!
//! Failure handling:
//! - default: the first failed step aborts the run. Running siblings are
//!   cancelled, every step that has not started is skipped.
//! - `continue_on_error`: failed steps only skip their transitive dependents;
//!   independent branches keep running and the run still ends failed.
//! - unresolved input references and the global deadline always abort.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use weft_types::config::EngineConfig;
use weft_types::event::ExecutionEvent;
use weft_types::run::{
    RunFailure, RunState, RunStatus, SkipReason, StepFailure, StepResult, StepState, StepStatus,
};
use weft_types::workflow::{ExecutionOptions, ExecutionPlan, WorkflowDefinition};

use super::cache::ResultCache;
use super::context::ExecutionContext;
use super::dag::{CompiledStep, DependencyGraph};
use super::definition::{ValidationError, validate};
use super::resilience::{ResilienceLayer, StepSettings};
use super::resolver::{ResolveError, resolve_input};
use crate::event::{EventEmitter, EventStream};
use crate::skill::{BoxSkill, SkillRegistry};

/// Deadline used when `start + global_timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Reasons a run is refused before it starts. No events are emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("step '{step}' uses unregistered skill '{skill}'")]
    UnknownSkill { step: String, skill: String },
}

/// Final aggregate of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    /// First failure observed, or the timeout/cancellation that ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Every step that ended `Failed`, sorted.
    pub failed_steps: Vec<String>,
    /// Terminal result of every step.
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.context.get(step_id)
    }

    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.context.output(step_id)
    }
}

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// Handle to a submitted run: its event stream, its result, and a way to
/// cancel it.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    events: EventStream,
    cancel: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Progress events, subscribed before the run started so none are missed
    /// unless the consumer lags past the buffer.
    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Request cooperative cancellation. The run ends `WorkflowFailed` with
    /// `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish. Fails only if the run task panicked.
    pub async fn wait(self) -> Result<RunOutcome, JoinError> {
        self.task.await
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Entry point: owns the skill registry, the shared result cache and the
/// engine defaults.
#[derive(Debug)]
pub struct WorkflowEngine {
    registry: Arc<SkillRegistry>,
    cache: Arc<ResultCache>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: SkillRegistry, config: EngineConfig) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.max_entries));
        Self {
            registry: Arc::new(registry),
            cache,
            config,
        }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache reused by runs with `share_cache_across_runs`.
    pub fn shared_cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Per-run options built from the engine configuration.
    pub fn default_options(&self) -> ExecutionOptions {
        self.config.to_options()
    }

    /// Validate and plan without executing anything.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, ValidationError> {
        Ok(validate(definition)?.plan())
    }

    /// Validate a definition and start running it in the background.
    ///
    /// Validation and skill lookup happen before this returns; a rejected
    /// definition produces no events.
    pub fn submit(
        &self,
        definition: &WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<RunHandle, SubmitError> {
        let graph = validate(definition)?;
        self.submit_graph(Arc::new(graph), options)
    }

    /// Start running an already validated graph in the background.
    pub fn submit_graph(
        &self,
        graph: Arc<DependencyGraph>,
        options: ExecutionOptions,
    ) -> Result<RunHandle, SubmitError> {
        self.check_skills(&graph)?;

        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(self.config.events.buffer);
        let events = emitter.subscribe();
        let run = self.prepare_run(graph, options, emitter, cancel.clone());
        let run_id = run.run_id;
        let span = run.span();
        let task = tokio::spawn(run.run().instrument(span));

        Ok(RunHandle {
            run_id,
            events,
            cancel,
            task,
        })
    }

    /// Run a validated graph to completion on the current task.
    ///
    /// Events are still produced but nobody is subscribed; use
    /// [`submit_graph`](Self::submit_graph) to observe them.
    pub async fn execute(
        &self,
        graph: Arc<DependencyGraph>,
        options: ExecutionOptions,
    ) -> Result<RunOutcome, SubmitError> {
        self.check_skills(&graph)?;
        let emitter = EventEmitter::new(self.config.events.buffer);
        let run = self.prepare_run(graph, options, emitter, CancellationToken::new());
        let span = run.span();
        Ok(run.run().instrument(span).await)
    }

    fn check_skills(&self, graph: &DependencyGraph) -> Result<(), SubmitError> {
        for step in graph.steps() {
            if !self.registry.contains(step.skill()) {
                return Err(SubmitError::UnknownSkill {
                    step: step.id().to_string(),
                    skill: step.skill().to_string(),
                });
            }
        }
        Ok(())
    }

    fn prepare_run(
        &self,
        graph: Arc<DependencyGraph>,
        options: ExecutionOptions,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> RunExecutor {
        let cache = if options.share_cache_across_runs {
            Arc::clone(&self.cache)
        } else {
            Arc::new(ResultCache::new(self.config.cache.max_entries))
        };

        RunExecutor {
            run_id: Uuid::now_v7(),
            graph,
            options,
            registry: Arc::clone(&self.registry),
            resilience: ResilienceLayer::new(cache),
            emitter,
            cancel,
            context: ExecutionContext::new(),
            states: HashMap::new(),
            run_state: RunState::Planned,
            failed_steps: Vec::new(),
            first_failure: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunExecutor
// ---------------------------------------------------------------------------

/// A step whose inputs are resolved and whose skill is known.
struct ReadyStep {
    step_id: String,
    skill: Arc<BoxSkill>,
    input: Value,
    settings: StepSettings,
}

/// State of one run. Only this type writes the context or emits events.
struct RunExecutor {
    run_id: Uuid,
    graph: Arc<DependencyGraph>,
    options: ExecutionOptions,
    registry: Arc<SkillRegistry>,
    resilience: ResilienceLayer,
    emitter: EventEmitter,
    cancel: CancellationToken,
    context: ExecutionContext,
    states: HashMap<String, StepState>,
    run_state: RunState,
    failed_steps: Vec<String>,
    first_failure: Option<RunFailure>,
}

impl RunExecutor {
    fn span(&self) -> tracing::Span {
        tracing::info_span!("workflow_run", run_id = %self.run_id, workflow = %self.graph.name())
    }

    async fn run(mut self) -> RunOutcome {
        let started = Instant::now();
        let started_at = Utc::now();
        let deadline = started
            .checked_add(self.options.global_timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let plan = self.graph.plan();

        self.transition_run(RunState::Running);
        tracing::info!(
            steps = plan.step_count(),
            batches = plan.len(),
            "workflow run started"
        );

        let mut abort: Option<RunFailure> = None;
        for (batch_idx, batch) in plan.batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                abort = Some(RunFailure::Cancelled);
                break;
            }
            if Instant::now() >= deadline {
                abort = Some(self.global_timeout_failure());
                break;
            }

            tracing::debug!(batch = batch_idx, steps = batch.len(), "starting batch");
            if let Some(reason) = self.run_batch(batch_idx, batch, deadline).await {
                abort = Some(reason);
                break;
            }
        }

        if abort.is_some() {
            for step_id in plan.batches.iter().flatten() {
                if self.state(step_id) == StepState::Pending {
                    self.skip(step_id, SkipReason::RunAborted);
                }
            }
        }

        self.finish(abort, started, started_at)
    }

    /// Run one batch. Returns the reason to abort the run, if any.
    async fn run_batch(
        &mut self,
        batch_idx: usize,
        batch: &[String],
        deadline: Instant,
    ) -> Option<RunFailure> {
        let graph = Arc::clone(&self.graph);
        let mut queue: VecDeque<ReadyStep> = VecDeque::new();

        for step_id in batch {
            let Some(step) = graph.step(step_id) else {
                continue;
            };

            let blocked_by = graph
                .dependencies(step_id)
                .into_iter()
                .find(|dep| !self.context.is_succeeded(dep));
            if let Some(dep) = blocked_by {
                self.skip(
                    step_id,
                    SkipReason::UpstreamFailed {
                        step_id: dep.to_string(),
                    },
                );
                continue;
            }

            match self.prepare(step) {
                Ok(ready) => queue.push_back(ready),
                Err(result) => {
                    let fatal = matches!(
                        result.error,
                        Some(StepFailure::UnresolvedReference { .. })
                    );
                    self.mark_started(step_id, step.skill(), batch_idx);
                    if let Some(failure) = self.complete(result) {
                        if fatal || !self.options.continue_on_error {
                            return Some(failure);
                        }
                    }
                }
            }
        }

        let run_cancel = self.cancel.clone();
        let batch_cancel = self.cancel.child_token();
        let limit = self.options.max_parallelism.unwrap_or(usize::MAX).max(1);
        let mut tasks: JoinSet<StepResult> = JoinSet::new();
        let mut running: HashMap<task::Id, (String, String)> = HashMap::new();
        let mut abort: Option<RunFailure> = None;

        loop {
            while abort.is_none() && tasks.len() < limit {
                let Some(ready) = queue.pop_front() else {
                    break;
                };
                self.mark_started(&ready.step_id, ready.skill.name(), batch_idx);
                let span = tracing::info_span!("step", step_id = %ready.step_id, skill = ready.skill.name());
                let owner = (ready.step_id.clone(), ready.skill.name().to_string());
                let handle = tasks.spawn(
                    run_step(self.resilience.clone(), ready, batch_cancel.clone()).instrument(span),
                );
                running.insert(handle.id(), owner);
            }
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = run_cancel.cancelled(), if abort.is_none() => {
                    tracing::warn!(batch = batch_idx, "run cancelled");
                    abort = Some(RunFailure::Cancelled);
                    batch_cancel.cancel();
                }
                _ = tokio::time::sleep_until(deadline), if abort.is_none() => {
                    tracing::warn!(batch = batch_idx, "global timeout reached");
                    abort = Some(self.global_timeout_failure());
                    batch_cancel.cancel();
                }
                joined = tasks.join_next_with_id() => {
                    let result = match joined {
                        Some(Ok((id, result))) => {
                            running.remove(&id);
                            with_cancel_reason(result, abort.as_ref())
                        }
                        Some(Err(error)) => {
                            let Some((step_id, skill)) = running.remove(&error.id()) else {
                                tracing::error!(batch = batch_idx, error = %error, "unknown step task failed");
                                continue;
                            };
                            tracing::error!(step_id = %step_id, error = %error, "step task panicked");
                            panicked_result(&step_id, &skill, &error)
                        }
                        None => break,
                    };
                    if let Some(failure) = self.complete(result) {
                        if abort.is_none() && !self.options.continue_on_error {
                            abort = Some(failure);
                            batch_cancel.cancel();
                        }
                    }
                }
            }
        }

        abort
    }

    /// Resolve a step's inputs and look up its skill. A step that cannot be
    /// prepared comes back as its failed result.
    fn prepare(&self, step: &CompiledStep) -> Result<ReadyStep, StepResult> {
        let input = match resolve_input(&step.input, &self.context) {
            Ok(input) => input,
            Err(ResolveError::Unresolved { step_id, path }) => {
                tracing::error!(
                    step_id = step.id(),
                    reference = %step_id,
                    path = %path,
                    "input reference unresolved at execution time"
                );
                return Err(StepResult::failed(
                    step.id(),
                    step.skill(),
                    StepFailure::UnresolvedReference { step_id, path },
                    0,
                    Utc::now(),
                ));
            }
        };

        let Some(skill) = self.registry.get(step.skill()) else {
            return Err(StepResult::failed(
                step.id(),
                step.skill(),
                StepFailure::Skill {
                    skill: step.skill().to_string(),
                    message: "skill is not registered".to_string(),
                },
                0,
                Utc::now(),
            ));
        };

        Ok(ReadyStep {
            step_id: step.id().to_string(),
            skill,
            input,
            settings: StepSettings {
                retry: self.options.step_retry(&step.spec).clone(),
                timeout: self.options.step_timeout(&step.spec),
                cache_ttl: self.options.cache_ttl,
            },
        })
    }

    // -----------------------------------------------------------------------
    // State transitions (the only writers of context and events)
    // -----------------------------------------------------------------------

    fn mark_started(&mut self, step_id: &str, skill: &str, batch: usize) {
        self.transition(step_id, StepState::Running);
        tracing::debug!(step_id, skill, batch, "step started");
        self.emitter.emit(ExecutionEvent::StepStarted {
            run_id: self.run_id,
            step_id: step_id.to_string(),
            skill: skill.to_string(),
            batch,
            at: Utc::now(),
        });
    }

    /// Record a started step's terminal result. Returns the run-level failure
    /// when the step failed.
    fn complete(&mut self, result: StepResult) -> Option<RunFailure> {
        self.transition(&result.step_id, StepState::from(result.status));

        let failure = match result.status {
            StepStatus::Succeeded => {
                tracing::debug!(
                    step_id = %result.step_id,
                    attempts = result.attempts,
                    cache_hit = result.cache_hit,
                    "step completed"
                );
                self.emitter.emit(ExecutionEvent::StepCompleted {
                    run_id: self.run_id,
                    step_id: result.step_id.clone(),
                    attempts: result.attempts,
                    cache_hit: result.cache_hit,
                    duration_ms: result.duration_ms().unwrap_or(0),
                    at: Utc::now(),
                });
                None
            }
            StepStatus::Failed => {
                let error = result.error.clone().unwrap_or_else(|| StepFailure::Skill {
                    skill: result.skill.clone(),
                    message: "unknown failure".to_string(),
                });
                tracing::warn!(
                    step_id = %result.step_id,
                    attempts = result.attempts,
                    error = %error,
                    "step failed"
                );
                self.emitter.emit(ExecutionEvent::StepFailed {
                    run_id: self.run_id,
                    step_id: result.step_id.clone(),
                    error: error.clone(),
                    attempts: result.attempts,
                    at: Utc::now(),
                });

                if self.options.continue_on_error {
                    let blocked = self.graph.descendants(&result.step_id);
                    if !blocked.is_empty() {
                        tracing::info!(
                            step_id = %result.step_id,
                            ?blocked,
                            "dependents of failed step will be skipped"
                        );
                    }
                }

                let failure = RunFailure::StepFailed {
                    step_id: result.step_id.clone(),
                    error,
                    attempts: result.attempts,
                };
                self.failed_steps.push(result.step_id.clone());
                self.first_failure.get_or_insert_with(|| failure.clone());
                Some(failure)
            }
            StepStatus::Skipped => None,
        };

        self.context.record(result);
        failure
    }

    fn skip(&mut self, step_id: &str, reason: SkipReason) {
        self.transition(step_id, StepState::Skipped);
        tracing::debug!(step_id, reason = %reason, "step skipped");
        self.emitter.emit(ExecutionEvent::StepSkipped {
            run_id: self.run_id,
            step_id: step_id.to_string(),
            reason: reason.clone(),
            at: Utc::now(),
        });

        let skill = self
            .graph
            .step(step_id)
            .map(CompiledStep::skill)
            .unwrap_or_default();
        self.context.record(StepResult::skipped(step_id, skill, reason));
    }

    fn finish(
        mut self,
        abort: Option<RunFailure>,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> RunOutcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        let failure = match abort {
            Some(reason @ (RunFailure::GlobalTimeout { .. } | RunFailure::Cancelled)) => Some(reason),
            other => self.first_failure.take().or(other),
        };
        self.failed_steps.sort();
        debug_assert!(
            self.graph.steps().iter().all(|step| self.state(step.id()).is_terminal()),
            "run finished with non-terminal steps"
        );

        let status = if failure.is_none() {
            self.transition_run(RunState::Completed);
            let steps_succeeded = self.context.count(StepStatus::Succeeded);
            tracing::info!(steps_succeeded, duration_ms, "workflow run completed");
            self.emitter.emit(ExecutionEvent::WorkflowCompleted {
                run_id: self.run_id,
                workflow: self.graph.name().to_string(),
                steps_succeeded,
                duration_ms,
                at: Utc::now(),
            });
            RunStatus::Completed
        } else {
            self.transition_run(RunState::Failed);
            let error = failure.clone().unwrap_or(RunFailure::Cancelled);
            tracing::warn!(
                error = %error,
                failed_steps = ?self.failed_steps,
                duration_ms,
                "workflow run failed"
            );
            self.emitter.emit(ExecutionEvent::WorkflowFailed {
                run_id: self.run_id,
                workflow: self.graph.name().to_string(),
                error,
                failed_steps: self.failed_steps.clone(),
                duration_ms,
                at: Utc::now(),
            });
            RunStatus::Failed
        };

        RunOutcome {
            run_id: self.run_id,
            workflow: self.graph.name().to_string(),
            status,
            failure,
            failed_steps: self.failed_steps,
            context: self.context,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    fn global_timeout_failure(&self) -> RunFailure {
        RunFailure::GlobalTimeout {
            timeout_ms: self.options.global_timeout.as_millis() as u64,
        }
    }

    fn state(&self, step_id: &str) -> StepState {
        self.states
            .get(step_id)
            .copied()
            .unwrap_or(StepState::Pending)
    }

    fn transition(&mut self, step_id: &str, next: StepState) {
        let current = self.state(step_id);
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?} for step '{step_id}'"
        );
        self.states.insert(step_id.to_string(), next);
    }

    fn transition_run(&mut self, next: RunState) {
        debug_assert!(
            self.run_state.can_transition_to(next),
            "illegal run transition {:?} -> {next:?}",
            self.run_state
        );
        self.run_state = next;
        if self.run_state.is_terminal() {
            tracing::trace!(state = ?self.run_state, "run reached terminal state");
        }
    }
}

async fn run_step(resilience: ResilienceLayer, ready: ReadyStep, cancel: CancellationToken) -> StepResult {
    resilience
        .invoke(&ready.step_id, &ready.skill, ready.input, &ready.settings, &cancel)
        .await
}

/// Failed result for a step whose task panicked.
fn panicked_result(step_id: &str, skill: &str, error: &JoinError) -> StepResult {
    let message = if error.is_panic() {
        "step task panicked".to_string()
    } else {
        format!("step task ended early: {error}")
    };
    StepResult::failed(
        step_id,
        skill,
        StepFailure::Skill {
            skill: skill.to_string(),
            message,
        },
        1,
        Utc::now(),
    )
}

/// Attach the run-level abort reason to a step cancelled because of it.
fn with_cancel_reason(mut result: StepResult, abort: Option<&RunFailure>) -> StepResult {
    if let (Some(StepFailure::Cancelled { reason }), Some(abort)) = (result.error.as_mut(), abort) {
        *reason = abort.to_string();
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
