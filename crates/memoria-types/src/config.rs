//! Pipeline configuration types.
//!
//! `PipelineConfig` represents the `config.toml` in the data directory that
//! sizes the worker pool and tunes retry/backoff and default chunking.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the ingestion pipeline.
///
/// Loaded from `{data_dir}/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent embedding workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long an idle worker sleeps before polling for claimable work again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Chunking applied to spaces created without an explicit configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Provider-call deadline for embedders that declare none.
    #[serde(default = "default_request_timeout_ms")]
    pub default_request_timeout_ms: u64,

    /// Per-embedder in-flight limit for embedders that declare none.
    #[serde(default = "default_max_concurrency")]
    pub default_max_concurrency: u32,

    /// How long a chunk claim stays valid. A PROCESSING chunk whose claim is
    /// older than this is released by the lease sweeper, so it must exceed
    /// every embedder's request deadline plus limiter wait.
    #[serde(default = "default_claim_lease_ms")]
    pub claim_lease_ms: u64,

    /// Largest content body the fetcher will read.
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> u32 {
    4
}

fn default_claim_lease_ms() -> u64 {
    300_000
}

fn default_max_content_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryPolicyConfig::default(),
            chunking: ChunkingConfig::default(),
            default_request_timeout_ms: default_request_timeout_ms(),
            default_max_concurrency: default_max_concurrency(),
            claim_lease_ms: default_claim_lease_ms(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

impl PipelineConfig {
    /// Replace invalid values with their defaults.
    ///
    /// Returns a description of every value that was replaced so the loader
    /// can log it.
    pub fn sanitized(mut self) -> (Self, Vec<String>) {
        let mut fixes = Vec::new();
        if self.workers == 0 {
            fixes.push("workers must be >= 1".to_string());
            self.workers = default_workers();
        }
        if self.poll_interval_ms == 0 {
            fixes.push("poll_interval_ms must be > 0".to_string());
            self.poll_interval_ms = default_poll_interval_ms();
        }
        if let Err(e) = self.retry.validate() {
            fixes.push(format!("retry: {e}"));
            self.retry = RetryPolicyConfig::default();
        }
        if let Err(e) = self.chunking.validate() {
            fixes.push(format!("chunking: {e}"));
            self.chunking = ChunkingConfig::default();
        }
        if self.default_request_timeout_ms == 0 {
            fixes.push("default_request_timeout_ms must be > 0".to_string());
            self.default_request_timeout_ms = default_request_timeout_ms();
        }
        if self.default_max_concurrency == 0 {
            fixes.push("default_max_concurrency must be >= 1".to_string());
            self.default_max_concurrency = default_max_concurrency();
        }
        if self.claim_lease_ms <= self.default_request_timeout_ms {
            fixes.push(format!(
                "claim_lease_ms ({}) must exceed default_request_timeout_ms ({})",
                self.claim_lease_ms, self.default_request_timeout_ms
            ));
            self.claim_lease_ms = default_claim_lease_ms().max(self.default_request_timeout_ms.saturating_mul(2));
        }
        if self.max_content_bytes == 0 {
            fixes.push("max_content_bytes must be > 0".to_string());
            self.max_content_bytes = default_max_content_bytes();
        }
        (self, fixes)
    }
}

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Total attempts per chunk, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter ratio in `[0, 1]`: the delay is scaled by `1 ± jitter·u`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within [0, 1], got {}", self.jitter));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        Ok(())
    }
}

/// How a space splits content into chunks. Sizes are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u32,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: u32,
}

fn default_max_chunk_size() -> u32 {
    2000
}

fn default_overlap_size() -> u32 {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap_size: default_overlap_size(),
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chunk_size: u32, overlap_size: u32) -> Self {
        Self {
            max_chunk_size,
            overlap_size,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be positive".to_string());
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.chunking.max_chunk_size, 2000);
        assert_eq!(config.chunking.overlap_size, 200);
        assert_eq!(config.default_request_timeout_ms, 30_000);
        assert_eq!(config.claim_lease_ms, 300_000);
        assert_eq!(config.max_content_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_pipeline_config_deserialize_with_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_pipeline_config_deserialize_partial_tables() {
        let toml_str = r#"
workers = 8

[retry]
max_attempts = 3
jitter = 0.0

[chunking]
max_chunk_size = 512
"#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.retry.jitter.abs() < f64::EPSILON);
        assert_eq!(config.chunking.max_chunk_size, 512);
        assert_eq!(config.chunking.overlap_size, 200);
    }

    #[test]
    fn test_sanitized_replaces_invalid_values() {
        let config = PipelineConfig {
            workers: 0,
            chunking: ChunkingConfig::new(100, 100),
            ..PipelineConfig::default()
        };
        let (fixed, fixes) = config.sanitized();
        assert_eq!(fixed.workers, 4);
        assert_eq!(fixed.chunking, ChunkingConfig::default());
        assert_eq!(fixes.len(), 2);
    }

    #[test]
    fn test_sanitized_lease_outlives_request_deadline() {
        let config = PipelineConfig {
            default_request_timeout_ms: 400_000,
            claim_lease_ms: 60_000,
            ..PipelineConfig::default()
        };
        let (fixed, fixes) = config.sanitized();
        assert_eq!(fixed.claim_lease_ms, 800_000);
        assert_eq!(fixes.len(), 1);
    }

    #[test]
    fn test_chunking_validate() {
        assert!(ChunkingConfig::new(2000, 200).validate().is_ok());
        assert!(ChunkingConfig::new(0, 0).validate().is_err());
        assert!(ChunkingConfig::new(10, 10).validate().is_err());
    }

    #[test]
    fn test_retry_validate() {
        let mut retry = RetryPolicyConfig::default();
        assert!(retry.validate().is_ok());
        retry.jitter = 1.5;
        assert!(retry.validate().is_err());
        retry = RetryPolicyConfig {
            max_attempts: 0,
            ..RetryPolicyConfig::default()
        };
        assert!(retry.validate().is_err());
    }
}
