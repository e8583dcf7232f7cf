//! Weft CLI entry point.
//!
//! Binary name: `weft`
//!
//! Parses CLI arguments, sets up tracing, loads the engine configuration and
//! dispatches to the command handlers.

mod cli;
mod config;
mod skills;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use weft_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(filter_for_verbosity(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json, cli.quiet),

        Commands::Plan { file } => cli::workflow::handle_plan(&file, cli.json),

        Commands::Run { file, overrides } => {
            let config = config::load_config(cli.config.as_deref()).await;
            cli::workflow::handle_run(&file, &overrides, config, cli.json, cli.quiet).await
        }

        Commands::Skills => cli::workflow::handle_skills(cli.json),

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
