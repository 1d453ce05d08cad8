//! Space management commands: create, list.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use memoria_types::config::ChunkingConfig;
use memoria_types::space::NewSpace;

use crate::state::{AppState, operator};

#[derive(Subcommand)]
pub enum SpaceCommand {
    /// Create a space bound to a registered embedder.
    Create {
        /// Unique space name.
        name: String,

        /// Name of the embedder chunks in this space are embedded with.
        #[arg(long)]
        embedder: String,

        /// Maximum chunk size in bytes (defaults to config.toml).
        #[arg(long, requires = "overlap")]
        chunk_size: Option<u32>,

        /// Bytes shared between consecutive chunks.
        #[arg(long, requires = "chunk_size")]
        overlap: Option<u32>,
    },

    /// List spaces.
    #[command(alias = "ls")]
    List,
}

pub async fn handle(state: &AppState, command: SpaceCommand, json: bool) -> Result<()> {
    match command {
        SpaceCommand::Create {
            name,
            embedder,
            chunk_size,
            overlap,
        } => {
            let chunking = chunk_size
                .zip(overlap)
                .map(|(size, overlap)| ChunkingConfig::new(size, overlap));
            create_space(state, name, embedder, chunking, json).await
        }
        SpaceCommand::List => list_spaces(state, json).await,
    }
}

pub async fn create_space(
    state: &AppState,
    name: String,
    embedder: String,
    chunking: Option<ChunkingConfig>,
    json: bool,
) -> Result<()> {
    let space = state
        .coordinator
        .create_space(NewSpace {
            name,
            embedding_model: embedder,
            chunking,
            created_by: operator(),
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&space)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Space '{}' created",
        style("✓").green().bold(),
        style(&space.name).cyan()
    );
    println!("  {}  {}", style("Embedder:").bold(), space.embedding_model);
    println!(
        "  {}  {} bytes, {} overlap",
        style("Chunks:").bold(),
        space.chunking.max_chunk_size,
        space.chunking.overlap_size
    );
    println!("  {}  {}", style("ID:").bold(), style(space.id).dim());
    println!();
    Ok(())
}

pub async fn list_spaces(state: &AppState, json: bool) -> Result<()> {
    let spaces = state.coordinator.list_spaces().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&spaces)?);
        return Ok(());
    }

    if spaces.is_empty() {
        println!();
        println!(
            "  {} No spaces yet. Create one with: {}",
            style("i").blue().bold(),
            style("memoriad space create <name> --embedder <embedder>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Embedder").fg(Color::White),
        Cell::new("Chunking").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for space in &spaces {
        table.add_row(vec![
            Cell::new(&space.name).fg(Color::Cyan),
            Cell::new(&space.embedding_model),
            Cell::new(format!(
                "{}/{}",
                space.chunking.max_chunk_size, space.chunking.overlap_size
            )),
            Cell::new(space.created_at.format("%Y-%m-%d").to_string()).fg(Color::DarkGrey),
            Cell::new(space.id).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
