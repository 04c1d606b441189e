//! Source ingestion and enrichment orchestration for sourceflow.
//!
//! This crate ties together draft validation, the staged ingestion pipeline,
//! enrichment reconciliation, and cache invalidation behind [`Sourceflow`].

pub mod builder;
pub mod capabilities;
pub mod enrichment;
mod ledger;
pub mod mutations;
pub mod notifier;
pub mod pipeline;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::sync::broadcast;

use sourceflow_shared::{
    DownloadedFile, EnrichmentState, IngestionError, IngestionRequest, NotebookApi, ReconcileError,
    SourceDraft, SourceKind, ValidationError,
};

pub use builder::{SourceFields, build};
pub use capabilities::{Capabilities, CapabilityRegistry, EmbedChoice};
pub use enrichment::EnrichmentTracker;
pub use mutations::{MutationService, NoteDraft, normalize_note_id};
pub use notifier::{
    CacheKey, CachedView, Generation, Invalidation, Mutation, Notifier, invalidated_keys,
};
pub use pipeline::{
    Completion, IngestionPipeline, IngestionReport, ProgressReporter, RetryPayload, SilentProgress,
    StageOutcome, StageReport, TransformationOutcome,
};

use ledger::Ledger;
use pipeline::StageRunner;

/// Entry point for UI collaborators: one instance per service connection.
///
/// All components share the same in-flight ledger and notifier, so a retry
/// started here sees an ingestion started here.
#[derive(Debug)]
pub struct Sourceflow<A> {
    registry: CapabilityRegistry<A>,
    pipeline: IngestionPipeline<A>,
    tracker: EnrichmentTracker<A>,
    mutations: MutationService<A>,
    notifier: Notifier,
}

impl<A: NotebookApi> Sourceflow<A> {
    pub fn new(api: A) -> Self {
        let api = Arc::new(api);
        let ledger = Ledger::new();
        let notifier = Notifier::new();
        let runner = StageRunner::new(Arc::clone(&api), ledger.clone(), notifier.clone());

        Self {
            registry: CapabilityRegistry::new(Arc::clone(&api)),
            pipeline: IngestionPipeline::new(runner.clone()),
            tracker: EnrichmentTracker::new(
                Arc::clone(&api),
                runner,
                ledger.clone(),
                notifier.clone(),
            ),
            mutations: MutationService::new(api, ledger, notifier.clone()),
            notifier,
        }
    }

    pub fn build(
        &self,
        kind: SourceKind,
        fields: &SourceFields,
    ) -> Result<SourceDraft, ValidationError> {
        build(kind, fields)
    }

    pub async fn ingest(
        &self,
        request: &IngestionRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport, IngestionError> {
        self.pipeline.ingest(request, progress).await
    }

    pub async fn reconcile(&self, source_id: &str) -> Result<EnrichmentState, ReconcileError> {
        self.tracker.reconcile(source_id).await
    }

    pub async fn retry_stage(
        &self,
        source_id: &str,
        payload: RetryPayload,
    ) -> Result<(), IngestionError> {
        self.tracker.retry_stage(source_id, payload).await
    }

    pub async fn download_file(
        &self,
        source_id: &str,
    ) -> sourceflow_shared::Result<DownloadedFile> {
        self.tracker.download_file(source_id).await
    }

    /// Receive an [`Invalidation`] after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.notifier.subscribe()
    }

    pub fn capabilities(&self) -> &CapabilityRegistry<A> {
        &self.registry
    }

    pub fn tracker(&self) -> &EnrichmentTracker<A> {
        &self.tracker
    }

    pub fn mutations(&self) -> &MutationService<A> {
        &self.mutations
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}
