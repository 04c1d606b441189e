//! Shared types, error model, remote-operation contract, and configuration
//! for sourceflow.
//!
//! This crate is the foundation depended on by all other sourceflow crates.
//! It provides:
//! - [`SourceflowError`] and the per-concern error types
//! - Domain types ([`SourceDraft`], [`Source`], [`Insight`], [`EnrichmentState`])
//! - [`NotebookApi`], the remote operations the core consumes
//! - Configuration ([`AppConfig`], config loading)

pub mod api;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use api::NotebookApi;
pub use config::{
    ApiConfig, AppConfig, IngestDefaults, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_base_url,
};
pub use error::{
    ApiError, ApiResult, IngestionError, ReconcileError, Result, SourceflowError, ValidationError,
};
pub use types::{
    ConnectionStatus, CreateOptions, DownloadedFile, DraftContent, EmbedAck, EmbedKind,
    EmbeddingPolicy, EmbeddingStatus, EnrichmentState, FileRef, IngestionId, IngestionRequest,
    Insight, NewNote, Note, NoteKind, NoteUpdate, NotebookUpdate, Settings, Source, SourceDraft,
    SourceKind, SourceLocation, Stage, Transformation,
};
