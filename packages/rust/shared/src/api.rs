//! Remote operations the core consumes.
//!
//! Transport and encoding belong to the implementor (see `sourceflow-client`).
//! Timeouts are the implementor's responsibility and surface as
//! [`ApiError::Timeout`](crate::ApiError::Timeout).

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::ApiResult;
use crate::types::{
    ConnectionStatus, CreateOptions, DownloadedFile, EmbedAck, EmbedKind, Insight, NewNote, Note,
    NoteUpdate, NotebookUpdate, Settings, Source, SourceDraft, Transformation,
};

/// The notebook service as seen by the ingestion core.
pub trait NotebookApi: Send + Sync {
    /// Persist a draft and return the stored source.
    fn create_source(
        &self,
        draft: &SourceDraft,
        options: CreateOptions,
    ) -> impl Future<Output = ApiResult<Source>> + Send;

    /// Attach an existing source to each of `notebook_ids`.
    fn associate_notebooks(
        &self,
        source_id: &str,
        notebook_ids: &BTreeSet<String>,
    ) -> impl Future<Output = ApiResult<()>> + Send;

    /// Apply one transformation to a source.
    fn create_insight(
        &self,
        source_id: &str,
        transformation_id: &str,
    ) -> impl Future<Output = ApiResult<Insight>> + Send;

    /// Request vector indexing of an item. Returns once the request is accepted.
    fn embed_content(
        &self,
        item_id: &str,
        kind: EmbedKind,
    ) -> impl Future<Output = ApiResult<EmbedAck>> + Send;

    fn get_source(&self, source_id: &str) -> impl Future<Output = ApiResult<Source>> + Send;

    fn list_insights(
        &self,
        source_id: &str,
    ) -> impl Future<Output = ApiResult<Vec<Insight>>> + Send;

    fn list_transformations(&self) -> impl Future<Output = ApiResult<Vec<Transformation>>> + Send;

    fn get_settings(&self) -> impl Future<Output = ApiResult<Settings>> + Send;

    fn delete_source(&self, source_id: &str) -> impl Future<Output = ApiResult<()>> + Send;

    fn update_source_title(
        &self,
        source_id: &str,
        title: &str,
    ) -> impl Future<Output = ApiResult<()>> + Send;

    fn create_note(&self, note: &NewNote) -> impl Future<Output = ApiResult<Note>> + Send;

    fn update_note(
        &self,
        note_id: &str,
        update: &NoteUpdate,
    ) -> impl Future<Output = ApiResult<Note>> + Send;

    fn delete_note(&self, note_id: &str) -> impl Future<Output = ApiResult<()>> + Send;

    fn update_notebook(
        &self,
        notebook_id: &str,
        update: &NotebookUpdate,
    ) -> impl Future<Output = ApiResult<()>> + Send;

    fn delete_notebook(&self, notebook_id: &str) -> impl Future<Output = ApiResult<()>> + Send;

    /// Fetch the original file of an uploaded source. A missing file is
    /// [`ApiError::NotFound`](crate::ApiError::NotFound).
    fn download_file(
        &self,
        source_id: &str,
    ) -> impl Future<Output = ApiResult<DownloadedFile>> + Send;

    /// Reachability check. Transport failures are errors.
    fn check_connection(&self) -> impl Future<Output = ApiResult<ConnectionStatus>> + Send;
}
