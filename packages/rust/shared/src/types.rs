//! Core domain types for sources, insights, notes, and notebooks.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IngestionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one `ingest` run in logs (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngestionId(pub Uuid);

impl IngestionId {
    /// Generate a new time-sortable ingestion identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for IngestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IngestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Source drafts
// ---------------------------------------------------------------------------

/// The three ways a source can enter a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Link,
    Upload,
    Text,
}

impl SourceKind {
    /// Wire name used by the notebook service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Upload => "upload",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a file the user picked for upload.
///
/// The core never opens it; the transport reads it when the draft is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub PathBuf);

impl FileRef {
    pub fn path(&self) -> &std::path::Path {
        &self.0
    }

    /// Last path component, used as the multipart file name.
    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into())
    }
}

/// The single populated content field of a draft. Its variant is the draft's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftContent {
    Link(Url),
    Upload(FileRef),
    Text(String),
}

/// A validated, normalized source awaiting creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDraft {
    /// User-supplied title; `None` lets the service fill one in.
    pub title: Option<String>,
    pub content: DraftContent,
}

impl SourceDraft {
    pub fn kind(&self) -> SourceKind {
        match self.content {
            DraftContent::Link(_) => SourceKind::Link,
            DraftContent::Upload(_) => SourceKind::Upload,
            DraftContent::Text(_) => SourceKind::Text,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match &self.content {
            DraftContent::Link(url) => Some(url),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            DraftContent::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<&FileRef> {
        match &self.content {
            DraftContent::Upload(file) => Some(file),
            _ => None,
        }
    }
}

/// Options forwarded verbatim to source creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Ask the service to process the content in the background.
    pub async_processing: bool,
}

/// Everything the orchestrator needs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub draft: SourceDraft,
    /// Notebooks to attach the new source to. May be empty.
    pub notebook_ids: BTreeSet<String>,
    /// Transformations to apply, in the order the user selected them.
    pub transformation_ids: Vec<String>,
    /// The user's embed choice; the active policy may override it.
    pub embed: bool,
    pub options: CreateOptions,
}

impl IngestionRequest {
    /// A request that only creates the source.
    pub fn create_only(draft: SourceDraft) -> Self {
        Self {
            draft,
            notebook_ids: BTreeSet::new(),
            transformation_ids: Vec::new(),
            embed: false,
            options: CreateOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted entities
// ---------------------------------------------------------------------------

/// Where a persisted source's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceLocation {
    Url(String),
    FilePath(String),
    Inline,
}

impl SourceLocation {
    /// A URL wins over a file path; neither means pasted text.
    pub fn from_asset(url: Option<String>, file_path: Option<String>) -> Self {
        match (url, file_path) {
            (Some(url), _) if !url.is_empty() => Self::Url(url),
            (_, Some(path)) if !path.is_empty() => Self::FilePath(path),
            _ => Self::Inline,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Url(_) => SourceKind::Link,
            Self::FilePath(_) => SourceKind::Upload,
            Self::Inline => SourceKind::Text,
        }
    }
}

/// A source as owned by the backing store. The core only holds transient copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: Option<String>,
    pub location: SourceLocation,
    pub embedded: bool,
    /// Whether the uploaded original is still on the server. `None` until
    /// the store reports it or a download settles it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_available: Option<bool>,
    pub notebooks: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Source {
    /// Name to save the original file under when the server sends none.
    pub fn fallback_file_name(&self) -> String {
        match &self.location {
            SourceLocation::FilePath(path) => path
                .rsplit(['/', '\\'])
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("source-{}", self.id)),
            _ => format!("source-{}", self.id),
        }
    }
}

/// The original uploaded file, as served by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// From the `Content-Disposition` header, when present.
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Outcome of a reachability check. An unreachable service is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Online,
    /// The service answers but its database does not.
    DatabaseOffline,
}

/// AI-derived content from applying one transformation to one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub source_id: String,
    pub transformation_id: String,
    pub insight_type: String,
    pub content: String,
}

/// A named AI-processing template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pre-selected when offering transformations for a new source.
    #[serde(default)]
    pub apply_default: bool,
}

/// How the embed choice is offered when adding a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingPolicy {
    /// The user decides per source.
    #[default]
    Ask,
    /// Every source is embedded regardless of the user's choice.
    Always,
    /// No source is embedded, even if the user asks.
    Never,
}

impl EmbeddingPolicy {
    /// Resolve the user's request against this policy. Policy wins.
    pub fn should_embed(&self, requested: bool) -> bool {
        match self {
            Self::Ask => requested,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Service settings relevant to ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_embedding_option: EmbeddingPolicy,
}

/// What an embed request is indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKind {
    Source,
    Note,
}

impl EmbedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Note => "note",
        }
    }
}

/// Acceptance of an embed request. Indexing itself completes later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAck {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// One step of the ingestion pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Create,
    Associate,
    Transform,
    Embed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Associate => "associate",
            Self::Transform => "transform",
            Self::Embed => "embed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Enrichment view
// ---------------------------------------------------------------------------

/// Embedding status as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    NotEmbedded,
    /// Requested (or accepted) but not yet reflected by the store.
    Embedding,
    Embedded,
    Failed,
}

/// Derived per-source view rebuilt from Source + Insight fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentState {
    pub source: Source,
    pub embedding_status: EmbeddingStatus,
    pub insights: Vec<Insight>,
    pub pending_transformations: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Notes and notebooks
// ---------------------------------------------------------------------------

/// Who wrote a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    #[default]
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub note_type: NoteKind,
}

/// Payload for creating a note inside one notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewNote {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub note_type: NoteKind,
    pub notebook_id: String,
}

/// Payload for editing an existing note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
}

/// Partial notebook edit; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotebookUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}
