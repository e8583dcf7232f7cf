//! Handlers for `validate`, `plan`, `run` and `skills`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use weft_core::workflow::{DependencyGraph, RunOutcome, WorkflowEngine, load_workflow_file, validate};
use weft_types::config::EngineConfig;
use weft_types::event::ExecutionEvent;
use weft_types::run::{StepResult, StepStatus};

use super::RunOverrides;
use crate::skills::{demo_registry, describe};

/// Load and validate a workflow file.
fn load_graph(file: &Path) -> Result<DependencyGraph> {
    let def = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    let graph = validate(&def).context("Workflow validation failed")?;
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let graph = load_graph(file)?;
    let plan = graph.plan();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "name": graph.name(),
            "steps": graph.len(),
            "batches": plan.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Workflow '{}' is valid",
            style("✓").green().bold(),
            style(graph.name()).cyan()
        );
        println!("  Steps: {}", graph.len());
        println!("  Batches: {}", plan.len());
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub fn handle_plan(file: &Path, json: bool) -> Result<()> {
    let graph = load_graph(file)?;
    let plan = graph.plan();

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Batch").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Skill"),
            Cell::new("Depends on"),
        ]);

    for (index, batch) in plan.batches.iter().enumerate() {
        for step_id in batch {
            let Some(step) = graph.step(step_id) else {
                continue;
            };
            let deps = if step.spec.depends_on.is_empty() {
                "-".to_string()
            } else {
                step.spec.depends_on.join(", ")
            };
            table.add_row(vec![
                Cell::new(index),
                Cell::new(step_id),
                Cell::new(step.skill()),
                Cell::new(deps),
            ]);
        }
    }

    println!();
    println!(
        "  Plan for '{}' ({} steps, {} batches, widest batch {})",
        style(graph.name()).cyan(),
        plan.step_count(),
        plan.len(),
        plan.max_width()
    );
    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    file: &Path,
    overrides: &RunOverrides,
    config: EngineConfig,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let graph = Arc::new(load_graph(file)?);
    let engine = WorkflowEngine::new(demo_registry(), config);
    let options = overrides.apply(engine.default_options());
    tracing::debug!(?options, "resolved execution options");

    let mut handle = engine
        .submit_graph(Arc::clone(&graph), options)
        .context("Failed to start workflow run")?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let show_progress = !json && !quiet;
    if show_progress {
        println!();
        println!(
            "  {} Running '{}' ({})",
            style("▶").cyan().bold(),
            style(graph.name()).cyan(),
            style(handle.run_id()).dim()
        );
        println!();
    }

    while let Some(event) = handle.events().recv().await {
        if show_progress {
            print_event(&event);
        }
        if event.is_run_terminal() {
            break;
        }
    }

    let missed = handle.events().missed();
    if missed > 0 {
        tracing::warn!(missed, "progress display skipped events");
    }

    let outcome = handle.wait().await.context("Workflow run task failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if !quiet {
        print_summary(&outcome);
    }

    if !outcome.is_success() {
        let reason = outcome
            .failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown failure".to_string());
        bail!("Workflow '{}' failed: {reason}", outcome.workflow);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StepStarted {
            step_id, skill, batch, ..
        } => {
            println!(
                "  {} {} {}",
                style("…").dim(),
                step_id,
                style(format!("({skill}, batch {batch})")).dim()
            );
        }
        ExecutionEvent::StepCompleted {
            step_id,
            attempts,
            cache_hit,
            duration_ms,
            ..
        } => {
            let detail = if *cache_hit {
                "cached".to_string()
            } else {
                format!("{attempts} attempt(s), {duration_ms} ms")
            };
            println!("  {} {} {}", style("✓").green(), step_id, style(detail).dim());
        }
        ExecutionEvent::StepFailed { step_id, error, .. } => {
            println!("  {} {}: {}", style("✗").red(), step_id, style(error).red());
        }
        ExecutionEvent::StepSkipped { step_id, reason, .. } => {
            println!("  {} {} {}", style("-").yellow(), step_id, style(reason).dim());
        }
        ExecutionEvent::WorkflowCompleted { .. } | ExecutionEvent::WorkflowFailed { .. } => {}
    }
}

fn print_summary(outcome: &RunOutcome) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Cache"),
            Cell::new("Duration"),
        ]);

    for result in outcome.context.results() {
        table.add_row(vec![
            Cell::new(&result.step_id),
            format_status(result.status),
            Cell::new(result.attempts),
            Cell::new(if result.cache_hit { "hit" } else { "-" }),
            Cell::new(format_duration(result)),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    if outcome.is_success() {
        println!(
            "  {} Completed in {} ms",
            style("✓").green().bold(),
            outcome.duration_ms
        );
        let outputs = outcome.context.outputs();
        if let Ok(pretty) = serde_json::to_string_pretty(&outputs) {
            println!();
            println!("  {}", style("Outputs:").bold());
            for line in pretty.lines() {
                println!("  {line}");
            }
        }
    } else {
        println!(
            "  {} Failed after {} ms",
            style("✗").red().bold(),
            outcome.duration_ms
        );
        if !outcome.failed_steps.is_empty() {
            println!("  Failed steps: {}", outcome.failed_steps.join(", "));
        }
    }
    println!();
}

fn format_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::Yellow),
    }
}

fn format_duration(result: &StepResult) -> String {
    result
        .duration_ms()
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

pub fn handle_skills(json: bool) -> Result<()> {
    let registry = demo_registry();

    if json {
        let out: Vec<_> = registry
            .names()
            .into_iter()
            .filter_map(|name| registry.get(name))
            .map(|skill| {
                serde_json::json!({
                    "name": skill.name(),
                    "version": skill.version(),
                    "description": describe(skill.name()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Skill").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Description"),
        ]);

    for name in registry.names() {
        let version = registry
            .get(name)
            .map(|skill| skill.version().to_string())
            .unwrap_or_default();
        table.add_row(vec![Cell::new(name), Cell::new(version), Cell::new(describe(name))]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
