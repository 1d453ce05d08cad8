//! Memoria operator CLI and worker daemon.
//!
//! Binary name: `memoriad`
//!
//! Parses CLI arguments, initializes tracing, the database and the pipeline
//! coordinator, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    memoria_observe::tracing_setup::init_tracing_with(
        cli.log_format,
        cli.otel,
        cli::log_directive(cli.verbose),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    memoria_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Run => cli::run::run(&state, json).await?,
        Commands::Embedder { action } => cli::embedder::handle(&state, action, json).await?,
        Commands::Space { action } => cli::space::handle(&state, action, json).await?,
        Commands::Submit(args) => cli::memory::submit(&state, args, json).await?,
        Commands::Status { memory_id } => cli::memory::status(&state, &memory_id, json).await?,
        Commands::Reprocess { memory_id, chunks } => {
            cli::memory::reprocess(&state, &memory_id, &chunks, json).await?
        }
        Commands::Delete { memory_id } => cli::memory::delete(&state, &memory_id, json).await?,
        Commands::Memories { space, limit } => {
            cli::memory::list_memories(&state, &space, limit, json).await?
        }
    }

    Ok(())
}
