//! Configuration loader for Memoria.
//!
//! Reads `config.toml` from the data directory (`~/.memoria/` in production)
//! and deserializes it into [`PipelineConfig`]. Falls back to sensible
//! defaults when the file is missing or malformed, and replaces individual
//! invalid values with their defaults.

use std::path::{Path, PathBuf};

use memoria_types::config::PipelineConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MEMORIA_DATA_DIR";

/// Resolve the data directory: `MEMORIA_DATA_DIR`, else `~/.memoria`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memoria")
}

/// Load pipeline configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`PipelineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Invalid values (e.g. `overlap_size >= max_chunk_size`) are replaced by
///   their defaults with a warning each.
pub async fn load_config(data_dir: &Path) -> PipelineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return PipelineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return PipelineConfig::default();
        }
    };

    let parsed = match toml::from_str::<PipelineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return PipelineConfig::default();
        }
    };

    let (config, fixes) = parsed.sanitized();
    for fix in fixes {
        tracing::warn!("Invalid value in {}: {fix}; using default", config_path.display());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config, PipelineConfig::default());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
workers = 2
poll_interval_ms = 100

[retry]
max_attempts = 7
base_delay_ms = 250

[chunking]
max_chunk_size = 1024
overlap_size = 64
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.workers, 2);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.chunking.max_chunk_size, 1024);
        assert_eq!(config.chunking.overlap_size, 64);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config, PipelineConfig::default());
    }

    #[tokio::test]
    async fn load_config_replaces_invalid_values() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "workers = 3\n[chunking]\nmax_chunk_size = 100\noverlap_size = 150\n",
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.workers, 3);
        assert_eq!(config.chunking, PipelineConfig::default().chunking);
    }
}
