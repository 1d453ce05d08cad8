use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Canonical status code attached to every failed operation.
///
/// Persisted verbatim on failed chunks and memories so status queries can
/// explain *why* something failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    ResourceExhausted,
    DeadlineExceeded,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::ResourceExhausted => write!(f, "RESOURCE_EXHAUSTED"),
            ErrorCode::DeadlineExceeded => write!(f, "DEADLINE_EXCEEDED"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NOT_FOUND" => Ok(ErrorCode::NotFound),
            "INVALID_ARGUMENT" => Ok(ErrorCode::InvalidArgument),
            "RESOURCE_EXHAUSTED" => Ok(ErrorCode::ResourceExhausted),
            "DEADLINE_EXCEEDED" => Ok(ErrorCode::DeadlineExceeded),
            "INTERNAL" => Ok(ErrorCode::Internal),
            other => Err(format!("invalid error code: '{other}'")),
        }
    }
}

/// Errors from repository operations (used by trait definitions in memoria-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Error returned by every inbound pipeline operation.
///
/// Callers inspect [`PipelineError::code`] to decide how to surface it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The canonical code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::NotFound { .. } => ErrorCode::NotFound,
            PipelineError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            PipelineError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            PipelineError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            PipelineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Build an error from a persisted code and message.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::NotFound => PipelineError::NotFound {
                entity: "resource",
                id: message,
            },
            ErrorCode::InvalidArgument => PipelineError::InvalidArgument(message),
            ErrorCode::ResourceExhausted => PipelineError::ResourceExhausted(message),
            ErrorCode::DeadlineExceeded => PipelineError::DeadlineExceeded(message),
            ErrorCode::Internal => PipelineError::Internal(message),
        }
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => PipelineError::not_found("entity", "unknown"),
            RepositoryError::Conflict(msg) => PipelineError::InvalidArgument(msg),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Timeouts, 5xx, 429. Retried with backoff.
    Transient,
    /// Validation failures and dimensionality mismatch. Never retried.
    Permanent,
}

/// Failure of a single embedding call.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} {code}: {message}")]
pub struct EmbedError {
    pub kind: FailureKind,
    pub code: ErrorCode,
    pub message: String,
    /// Provider hint from a `Retry-After` header, if any.
    pub retry_after_ms: Option<u64>,
}

impl EmbedError {
    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            code,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn permanent(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            code,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        Self {
            kind: FailureKind::Transient,
            code: ErrorCode::ResourceExhausted,
            message: "provider rate limit (429)".to_string(),
            retry_after_ms,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(ErrorCode::DeadlineExceeded, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    /// Classify an HTTP status code returned by a provider.
    ///
    /// Only meaningful for non-success statuses.
    pub fn from_http_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            429 => Self::rate_limited(retry_after_ms),
            500..=599 => Self::transient(
                ErrorCode::Internal,
                format!("provider returned {status}: {snippet}"),
            ),
            404 => Self::permanent(
                ErrorCode::NotFound,
                format!("provider endpoint not found (404): {snippet}"),
            ),
            _ => Self::permanent(
                ErrorCode::InvalidArgument,
                format!("provider rejected request ({status}): {snippet}"),
            ),
        }
    }
}
