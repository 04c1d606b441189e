//! Error types for sourceflow.
//!
//! Library crates use these via `thiserror`. The CLI wraps them with
//! `color-eyre` for rich diagnostics.
//!
//! The taxonomy follows how each failure is recovered from:
//! - [`ValidationError`]: bad user input, shown inline, nothing sent.
//! - [`ApiError`]: one remote operation failed (transport, status, decoding).
//! - [`IngestionError`]: a pipeline stage failed; `Create` is fatal.
//! - [`ReconcileError`]: a read failed; the stale view is kept.

use std::path::PathBuf;

use crate::types::{EnrichmentState, Stage};

/// Failure of a single remote operation.
///
/// Cloneable so it can be stored inside per-stage outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, TLS error, etc.
    #[error("network error: {0}")]
    Network(String),

    /// The transport gave up waiting.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The service answered with a non-success status.
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A local file referenced by a draft could not be read.
    #[error("cannot read {path:?}: {message}")]
    File { path: PathBuf, message: String },
}

/// Convenience alias for remote operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// User input rejected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure surfaced by `ingest` or `retry_stage`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    /// Source creation failed. Nothing was persisted; retrying from scratch is safe.
    #[error("source creation failed: {cause}")]
    Create { cause: ApiError },

    /// One non-fatal stage failed for an existing source.
    #[error("{stage} stage failed for source {source_id}: {cause}")]
    Stage {
        stage: Stage,
        source_id: String,
        cause: ApiError,
    },

    /// Another ingestion or retry for this source has not finished yet.
    #[error("an ingestion for source {source_id} is already in flight")]
    InFlight { source_id: String },
}

impl IngestionError {
    /// The stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Create { .. } => Some(Stage::Create),
            Self::Stage { stage, .. } => Some(*stage),
            Self::InFlight { .. } => None,
        }
    }
}

/// A read failed while rebuilding a source's enrichment view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not refresh source {source_id}: {cause}")]
pub struct ReconcileError {
    pub source_id: String,
    pub cause: ApiError,
    /// Last known view, to be shown as "may be outdated". `None` if never loaded.
    pub stale: Option<EnrichmentState>,
}

/// Top-level error type for all sourceflow operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SourceflowError>;

impl SourceflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SourceflowError::config("missing base_url");
        assert_eq!(err.to_string(), "config error: missing base_url");

        let err = ValidationError::new("url", "must be an absolute URL");
        assert_eq!(err.to_string(), "invalid url: must be an absolute URL");
    }

    #[test]
    fn stage_error_names_stage_and_source() {
        let err = IngestionError::Stage {
            stage: Stage::Associate,
            source_id: "source:1".into(),
            cause: ApiError::Status {
                code: 500,
                message: "boom".into(),
            },
        };
        assert_eq!(err.stage(), Some(Stage::Associate));
        let text = err.to_string();
        assert!(text.contains("associate"));
        assert!(text.contains("source:1"));
        assert!(text.contains("HTTP 500"));
    }

    #[test]
    fn conversions_are_transparent() {
        let api = ApiError::NotFound("source:x".into());
        let err: SourceflowError = api.clone().into();
        assert_eq!(err.to_string(), api.to_string());
    }
}
