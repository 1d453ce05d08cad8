//! `memoriad run`: the worker daemon.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Start the ingest loop and embed workers; stop on Ctrl+C or SIGTERM after
/// in-flight work finishes.
pub async fn run(state: &AppState, json: bool) -> Result<()> {
    let config = state.coordinator.config();
    if !json {
        println!(
            "  {} Memoria worker pool started ({} embed worker{}, data in {})",
            style("⚡").bold(),
            config.workers,
            if config.workers == 1 { "" } else { "s" },
            style(state.data_dir.display()).dim()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }
    tracing::info!(workers = config.workers, data_dir = %state.data_dir.display(), "worker pool starting");

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, finishing in-flight work");
        signal_token.cancel();
    });

    Arc::clone(&state.coordinator).run(cancel).await?;

    if json {
        println!("{}", serde_json::json!({"stopped": true}));
    } else {
        println!("\n  Worker pool stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
