//! Embedder management commands: add, list.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use secrecy::{ExposeSecret, SecretString};

use memoria_types::attributes::Labels;
use memoria_types::embedder::{Modality, NewEmbedder, ProviderType};

use crate::state::{AppState, operator};

#[derive(Subcommand)]
pub enum EmbedderCommand {
    /// Register an embedding endpoint.
    Add(AddArgs),

    /// List registered embedders.
    #[command(alias = "ls")]
    List,
}

#[derive(Args)]
pub struct AddArgs {
    /// Unique name; spaces refer to the embedder by it.
    pub name: String,

    /// Wire protocol: OPENAI, VLLM or TEI.
    #[arg(long)]
    pub provider: ProviderType,

    /// Base URL, e.g. https://api.openai.com.
    #[arg(long)]
    pub endpoint: String,

    /// Request path; defaults to the provider's standard path.
    #[arg(long)]
    pub api_path: Option<String>,

    /// Model identifier sent to the provider.
    #[arg(long)]
    pub model: String,

    /// Vector length every response must have.
    #[arg(long)]
    pub dimensions: u32,

    /// Maximum input bytes per text.
    #[arg(long)]
    pub max_sequence_length: Option<u32>,

    /// Supported modality (repeatable). TEXT is required.
    #[arg(long = "modality", default_value = "TEXT")]
    pub modalities: Vec<Modality>,

    /// Label as key=value (repeatable).
    #[arg(long = "label")]
    pub labels: Vec<String>,

    #[arg(long)]
    pub max_batch_size: Option<u32>,

    /// In-flight request limit for this embedder.
    #[arg(long)]
    pub max_concurrency: Option<u32>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub owner: Option<String>,

    /// Read the API key from this environment variable.
    #[arg(long, conflicts_with = "api_key")]
    pub api_key_env: Option<String>,

    /// API key given inline (prefer --api-key-env).
    #[arg(long)]
    pub api_key: Option<String>,
}

pub async fn handle(state: &AppState, command: EmbedderCommand, json: bool) -> Result<()> {
    match command {
        EmbedderCommand::Add(args) => add_embedder(state, args, json).await,
        EmbedderCommand::List => list_embedders(state, json).await,
    }
}

/// Register an embedder. Credentials are encrypted before they are stored;
/// only their fingerprint is shown back.
pub async fn add_embedder(state: &AppState, args: AddArgs, json: bool) -> Result<()> {
    let credentials = read_credentials(&args)?;
    let labels = Labels::parse_pairs(args.labels.iter().map(String::as_str))
        .context("invalid --label")?;

    let request = NewEmbedder {
        name: args.name,
        provider_type: args.provider,
        endpoint_url: args.endpoint,
        api_path: args.api_path,
        model_identifier: args.model,
        dimensionality: args.dimensions,
        max_sequence_length: args.max_sequence_length,
        supported_modalities: args.modalities.into_iter().collect::<BTreeSet<_>>(),
        labels,
        max_batch_size: args.max_batch_size,
        max_concurrency: args.max_concurrency,
        request_timeout_ms: args.timeout_ms,
        owner: args.owner,
    };

    let embedder = state
        .coordinator
        .register_embedder(
            request,
            credentials.as_ref().map(|s| s.expose_secret()),
            operator(),
        )
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&embedder)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Embedder '{}' registered",
        style("✓").green().bold(),
        style(&embedder.name).cyan()
    );
    println!("  {}  {}", style("Provider:").bold(), embedder.provider_type);
    println!("  {}  {}", style("URL:").bold(), embedder.request_url());
    println!(
        "  {}  {} ({} dims)",
        style("Model:").bold(),
        embedder.model_identifier,
        embedder.dimensionality
    );
    if let Some(fingerprint) = &embedder.credentials_fingerprint {
        println!("  {}  {}", style("Key:").bold(), style(fingerprint).dim());
    }
    println!("  {}  {}", style("ID:").bold(), style(embedder.id).dim());
    println!();
    Ok(())
}

fn read_credentials(args: &AddArgs) -> Result<Option<SecretString>> {
    if let Some(var) = &args.api_key_env {
        let value = std::env::var(var)
            .with_context(|| format!("environment variable {var} is not set"))?;
        return Ok(Some(SecretString::from(value)));
    }
    Ok(args.api_key.clone().map(SecretString::from))
}

pub async fn list_embedders(state: &AppState, json: bool) -> Result<()> {
    let embedders = state.coordinator.registry().list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&embedders)?);
        return Ok(());
    }

    if embedders.is_empty() {
        println!();
        println!(
            "  {} No embedders registered. Add one with: {}",
            style("i").blue().bold(),
            style("memoriad embedder add <name> --provider TEI --endpoint ... --model ... --dimensions ...")
                .yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Provider").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Dims").fg(Color::White),
        Cell::new("URL").fg(Color::White),
        Cell::new("Key").fg(Color::White),
    ]);

    for embedder in &embedders {
        table.add_row(vec![
            Cell::new(&embedder.name).fg(Color::Cyan),
            Cell::new(embedder.provider_type.to_string()),
            Cell::new(&embedder.model_identifier),
            Cell::new(embedder.dimensionality),
            Cell::new(embedder.request_url()).fg(Color::DarkGrey),
            Cell::new(embedder.credentials_fingerprint.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} embedder{}",
        style(embedders.len()).bold(),
        if embedders.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}
