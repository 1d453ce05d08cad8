//! Inbound pipeline commands: submit, status, reprocess, delete, memories.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use memoria_infra::fetch::fs::mime_from_extension;
use memoria_types::attributes::Metadata;
use memoria_types::memory::{ChunkStatusView, MemoryStatusReport, NewMemory, ProcessingStatus, VectorStatus};

use crate::state::{AppState, operator};

#[derive(Args)]
pub struct SubmitArgs {
    /// Space ID or name.
    pub space: String,

    /// Content reference: an http(s) URL or a key in the local store.
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub content_ref: Option<String>,

    /// Copy a local file into the content store and submit it.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// MIME type; guessed from the file extension when omitted.
    #[arg(long)]
    pub content_type: Option<String>,

    /// Metadata as key=value (repeatable).
    #[arg(long = "meta")]
    pub metadata: Vec<String>,
}

pub async fn submit(state: &AppState, args: SubmitArgs, json: bool) -> Result<()> {
    let space = state.coordinator.find_space(&args.space).await?;
    let metadata = Metadata::parse_pairs(args.metadata.iter().map(String::as_str))
        .context("invalid --meta")?;

    let (content_ref, guessed) = match (&args.file, args.content_ref) {
        (Some(path), _) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("file name is not valid UTF-8")?;
            let key = format!("{}/{file_name}", Uuid::now_v7());
            let content_ref = state.store.put(&key, &bytes).await?;
            (content_ref, mime_from_extension(path))
        }
        (None, Some(content_ref)) => {
            let guessed = mime_from_extension(std::path::Path::new(&content_ref));
            (content_ref, guessed)
        }
        (None, None) => bail!("either a content reference or --file is required"),
    };

    let Some(content_type) = args.content_type.or(guessed.map(str::to_string)) else {
        bail!("cannot guess the content type of '{content_ref}'; pass --content-type");
    };

    let memory_id = state
        .coordinator
        .submit(NewMemory {
            space_id: space.id,
            content_ref: content_ref.clone(),
            content_type: content_type.clone(),
            metadata,
            created_by: operator(),
        })
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "memory_id": memory_id,
                "space_id": space.id,
                "content_ref": content_ref,
                "content_type": content_type,
            })
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} Submitted to '{}'",
        style("✓").green().bold(),
        style(&space.name).cyan()
    );
    println!("  {}  {}", style("Memory:").bold(), memory_id);
    println!("  {}  {}", style("Content:").bold(), style(&content_ref).dim());
    println!();
    println!(
        "  Chunks are embedded by {}. Check progress with: {}",
        style("memoriad run").yellow(),
        style(format!("memoriad status {memory_id}")).yellow()
    );
    println!();
    Ok(())
}

pub async fn status(state: &AppState, memory_id: &Uuid, json: bool) -> Result<()> {
    let report = state.coordinator.get_status(memory_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &MemoryStatusReport) {
    let tally = &report.tally;
    println!();
    println!(
        "  {} {}",
        style("Memory").bold(),
        style(report.memory_id).cyan()
    );
    println!("  {}  {}", style("Status:").bold(), format_status(report.processing_status));
    if let memoria_types::memory::IngestState::Failed { failure } = &report.ingest {
        println!("  {}  {}", style("Ingest:").bold(), style(failure).red());
    } else if let Some(at) = report.next_ingest_at {
        println!(
            "  {}  {} failed attempt{}, retry at {}",
            style("Ingest:").bold(),
            report.ingest_attempts,
            if report.ingest_attempts == 1 { "" } else { "s" },
            style(at.format("%H:%M:%S")).yellow()
        );
    }
    println!(
        "  {}  {} total: {} generated, {} pending, {} processing, {} retrying, {} failed",
        style("Chunks:").bold(),
        tally.total(),
        style(tally.generated).green(),
        tally.pending,
        tally.processing,
        style(tally.retrying).yellow(),
        style(tally.failed).red()
    );

    if report.chunks.is_empty() {
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Span").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
        Cell::new("Chunk").fg(Color::White),
    ]);
    for chunk in &report.chunks {
        table.add_row(vec![
            Cell::new(chunk.sequence_number),
            Cell::new(format!("{}..{}", chunk.start_offset, chunk.end_offset)),
            status_cell(chunk),
            Cell::new(chunk.attempt_count),
            Cell::new(chunk_detail(chunk)).fg(Color::DarkGrey),
            Cell::new(chunk.chunk_id).fg(Color::DarkGrey),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}

fn format_status(status: ProcessingStatus) -> String {
    match status {
        ProcessingStatus::Pending => style("PENDING").dim().to_string(),
        ProcessingStatus::Processing => style("PROCESSING").yellow().to_string(),
        ProcessingStatus::Completed => style("COMPLETED").green().to_string(),
        ProcessingStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn status_cell(chunk: &ChunkStatusView) -> Cell {
    match chunk.vector_status {
        VectorStatus::Generated => Cell::new("GENERATED").fg(Color::Green),
        VectorStatus::Processing => Cell::new("PROCESSING").fg(Color::Yellow),
        VectorStatus::Pending => Cell::new("PENDING"),
        VectorStatus::Failed if chunk.terminal => Cell::new("FAILED").fg(Color::Red),
        VectorStatus::Failed => Cell::new("RETRYING").fg(Color::Yellow),
    }
}

fn chunk_detail(chunk: &ChunkStatusView) -> String {
    match (&chunk.failure, chunk.next_attempt_at) {
        (Some(failure), Some(at)) => format!("{failure}; retry at {}", at.format("%H:%M:%S")),
        (Some(failure), None) => failure.to_string(),
        (None, _) => String::new(),
    }
}

pub async fn reprocess(state: &AppState, memory_id: &Uuid, chunks: &[Uuid], json: bool) -> Result<()> {
    let targets = (!chunks.is_empty()).then_some(chunks);
    let status = state.coordinator.reprocess(memory_id, targets).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "memory_id": memory_id,
                "processing_status": status,
                "chunks_reset": if chunks.is_empty() { serde_json::Value::from("all") } else { chunks.len().into() },
            })
        );
        return Ok(());
    }

    let scope = if chunks.is_empty() {
        "all chunks".to_string()
    } else {
        format!("{} chunk{}", chunks.len(), if chunks.len() == 1 { "" } else { "s" })
    };
    println!(
        "  {} Reset {} of {} (now {})",
        style("✓").green().bold(),
        scope,
        style(memory_id).cyan(),
        format_status(status)
    );
    Ok(())
}

pub async fn delete(state: &AppState, memory_id: &Uuid, json: bool) -> Result<()> {
    state.coordinator.delete_memory(memory_id).await?;

    if json {
        println!("{}", serde_json::json!({"deleted": true, "memory_id": memory_id}));
    } else {
        println!(
            "  {} Memory {} deleted",
            style("✓").green().bold(),
            style(memory_id).cyan()
        );
    }
    Ok(())
}

pub async fn list_memories(state: &AppState, space: &str, limit: i64, json: bool) -> Result<()> {
    let space = state.coordinator.find_space(space).await?;
    let memories = state.coordinator.list_memories(&space.id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memories)?);
        return Ok(());
    }

    if memories.is_empty() {
        println!();
        println!(
            "  {} No memories in '{}'",
            style("i").blue().bold(),
            style(&space.name).cyan()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Chunks").fg(Color::White),
        Cell::new("Content").fg(Color::White),
        Cell::new("Submitted").fg(Color::White),
    ]);
    for memory in &memories {
        table.add_row(vec![
            Cell::new(memory.id).fg(Color::Cyan),
            Cell::new(format_status(memory.processing_status)),
            Cell::new(format!("{}/{}", memory.tally.generated, memory.tally.total())),
            Cell::new(&memory.content_ref),
            Cell::new(memory.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
