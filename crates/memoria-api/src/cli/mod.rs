//! CLI command definitions for the `memoriad` binary.
//!
//! Uses clap derive macros. Resource commands follow a noun-verb pattern
//! (`memoriad embedder add`, `memoriad space list`); the pipeline's inbound
//! operations are top-level verbs (`submit`, `status`, `reprocess`, `delete`).

pub mod embedder;
pub mod memory;
pub mod run;
pub mod space;

use clap::{Parser, Subcommand};
use memoria_observe::tracing_setup::LogFormat;

/// Chunk, embed and persist memories.
#[derive(Parser)]
#[command(name = "memoriad", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logging (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format: text or json.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingest loop and embed workers until Ctrl+C or SIGTERM.
    Run,

    /// Manage embedders (add, list).
    Embedder {
        #[command(subcommand)]
        action: embedder::EmbedderCommand,
    },

    /// Manage spaces (create, list).
    Space {
        #[command(subcommand)]
        action: space::SpaceCommand,
    },

    /// Submit content to a space for chunking and embedding.
    Submit(memory::SubmitArgs),

    /// Show a memory's processing status and per-chunk detail.
    Status {
        /// Memory ID.
        memory_id: uuid::Uuid,
    },

    /// Reset a memory's chunks to PENDING so they are embedded again.
    Reprocess {
        /// Memory ID.
        memory_id: uuid::Uuid,

        /// Only reset these chunks (repeatable). Defaults to all chunks.
        #[arg(long = "chunk")]
        chunks: Vec<uuid::Uuid>,
    },

    /// Delete a memory and its chunks.
    #[command(alias = "rm")]
    Delete {
        /// Memory ID.
        memory_id: uuid::Uuid,
    },

    /// List the most recent memories in a space.
    #[command(alias = "ls")]
    Memories {
        /// Space ID or name.
        space: String,

        /// Maximum number of memories to show.
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Tracing fallback directive for a `-v` count when `RUST_LOG` is unset.
pub fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn,memoria=info",
        1 => "info,memoria=debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reprocess_chunks() {
        let memory = uuid::Uuid::now_v7();
        let chunk = uuid::Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "memoriad",
            "--json",
            "reprocess",
            &memory.to_string(),
            "--chunk",
            &chunk.to_string(),
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Reprocess { memory_id, chunks } => {
                assert_eq!(memory_id, memory);
                assert_eq!(chunks, vec![chunk]);
            }
            _ => panic!("expected reprocess"),
        }
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["memoriad", "--log-format", "json", "-vv", "run"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(log_directive(cli.verbose), "trace");
    }
}
