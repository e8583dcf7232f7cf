//! CLI command definitions for the `weft` binary.
//!
//! Uses clap derive macros. Every command takes a workflow file (YAML, or
//! JSON by extension) except `skills` and `completions`.

pub mod workflow;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use weft_types::workflow::ExecutionOptions;

/// Validate, plan and run declarative skill workflows.
#[derive(Parser)]
#[command(name = "weft", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug engine logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file (defaults to <config dir>/weft/weft.toml).
    #[arg(long, global = true, env = "WEFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow definition without running it.
    Validate {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// Show the batches a workflow would execute in.
    Plan {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// Execute a workflow with the built-in demo skills.
    Run {
        /// Path to the workflow file.
        file: PathBuf,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// List the skills available to `run`.
    Skills,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Per-run flags layered over the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct RunOverrides {
    /// Global run timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Per-step timeout in seconds (at least 1).
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub step_timeout: Option<u64>,

    /// Keep running independent branches after a step fails.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Attempts per step, including the first.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub base_delay_ms: Option<u64>,

    /// Backoff multiplier between retries.
    #[arg(long)]
    pub backoff: Option<f64>,

    /// Random jitter bound added to each retry delay, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub jitter_ms: Option<u64>,

    /// Cache step results for this many seconds.
    #[arg(long, value_name = "SECS")]
    pub cache_ttl: Option<u64>,

    /// Maximum steps running at once within a batch.
    #[arg(long)]
    pub max_parallelism: Option<usize>,
}

impl RunOverrides {
    /// Apply the flags that were given on top of `options`.
    pub fn apply(&self, mut options: ExecutionOptions) -> ExecutionOptions {
        use std::time::Duration;

        if let Some(secs) = self.timeout {
            options.global_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.step_timeout {
            options.per_step_timeout = Duration::from_secs(secs.max(1));
        }
        if self.continue_on_error {
            options.continue_on_error = true;
        }
        if let Some(n) = self.max_attempts {
            options.retry_policy.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            options.retry_policy.base_delay_ms = ms;
        }
        if let Some(multiplier) = self.backoff {
            options.retry_policy.backoff_multiplier = multiplier;
        }
        if let Some(ms) = self.jitter_ms {
            options.retry_policy.jitter_ms = Some(ms);
        }
        if let Some(secs) = self.cache_ttl {
            options.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_parallelism {
            options.max_parallelism = Some(n);
        }
        options
    }
}
