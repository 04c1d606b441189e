//! Enrichment tracker.
//!
//! Rebuilds a source's [`EnrichmentState`] from the store, folding in what
//! this process knows about requests the store may not reflect yet, and
//! re-runs single failed stages.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use sourceflow_shared::{
    ApiError, ApiResult, DownloadedFile, EmbeddingStatus, EnrichmentState, IngestionError, Insight,
    NotebookApi, ReconcileError, Source, SourceKind, ValidationError,
};

use crate::ledger::{EmbedRecord, Ledger, RecordSnapshot};
use crate::notifier::Notifier;
use crate::pipeline::{RetryPayload, StageRunner};

/// Derive the embedding status from the stored flag and local records.
///
/// The store wins once it reports the source as embedded.
fn embedding_status(source: &Source, embed: EmbedRecord) -> EmbeddingStatus {
    if source.embedded {
        return EmbeddingStatus::Embedded;
    }
    match embed {
        EmbedRecord::InFlight | EmbedRecord::Accepted => EmbeddingStatus::Embedding,
        EmbedRecord::Failed => EmbeddingStatus::Failed,
        EmbedRecord::None => EmbeddingStatus::NotEmbedded,
    }
}

/// Transformations still awaited: in flight here and not yet in the store.
fn pending_transformations(snapshot: &RecordSnapshot, insights: &[Insight]) -> BTreeSet<String> {
    snapshot
        .transforms_in_flight
        .iter()
        .filter(|id| !insights.iter().any(|i| &i.transformation_id == *id))
        .cloned()
        .collect()
}

/// Assemble the view of one source from fresh reads and the ledger.
fn derive_state(
    source: Source,
    insights: Vec<Insight>,
    snapshot: &RecordSnapshot,
) -> EnrichmentState {
    EnrichmentState {
        embedding_status: embedding_status(&source, snapshot.embed),
        pending_transformations: pending_transformations(snapshot, &insights),
        source,
        insights,
    }
}

/// Read side of enrichment plus single-stage retries.
#[derive(Debug)]
pub struct EnrichmentTracker<A> {
    api: Arc<A>,
    runner: StageRunner<A>,
    ledger: Ledger,
    notifier: Notifier,
}

impl<A: NotebookApi> EnrichmentTracker<A> {
    pub(crate) fn new(
        api: Arc<A>,
        runner: StageRunner<A>,
        ledger: Ledger,
        notifier: Notifier,
    ) -> Self {
        Self {
            api,
            runner,
            ledger,
            notifier,
        }
    }

    async fn fetch(&self, source_id: &str) -> ApiResult<(Source, Vec<Insight>)> {
        let (source, insights) = tokio::join!(
            self.api.get_source(source_id),
            self.api.list_insights(source_id)
        );
        Ok((source?, insights?))
    }

    /// Fetch the source and its insights and rebuild the view.
    ///
    /// On a read failure the cached view, if any, is flagged as outdated and
    /// handed back inside the error rather than dropped. A view whose source
    /// was invalidated while the reads were in flight is cached as stale.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, source_id: &str) -> Result<EnrichmentState, ReconcileError> {
        let observed = self.notifier.generation(source_id);
        let (source, insights) = match self.fetch(source_id).await {
            Ok(fetched) => fetched,
            Err(cause) => {
                warn!(error = %cause, "reconcile failed, keeping last known view");
                self.notifier.mark_outdated(source_id);
                return Err(ReconcileError {
                    source_id: source_id.to_string(),
                    cause,
                    stale: self.notifier.cached(source_id).map(|view| view.state),
                });
            }
        };

        if source.embedded {
            self.ledger.embed_observed(source_id);
        }
        let state = derive_state(source, insights, &self.ledger.snapshot(source_id));
        debug!(
            status = ?state.embedding_status,
            insights = state.insights.len(),
            pending = state.pending_transformations.len(),
            "source reconciled"
        );

        self.notifier.store_observed(state.clone(), observed);
        Ok(state)
    }

    /// Download the original file of an uploaded source.
    ///
    /// A file already known to be gone is reported as [`ApiError::NotFound`]
    /// without another request. The outcome is kept on the cached view.
    #[instrument(skip(self))]
    pub async fn download_file(
        &self,
        source_id: &str,
    ) -> sourceflow_shared::Result<DownloadedFile> {
        let source = match self.notifier.cached(source_id) {
            Some(view) => view.state.source,
            None => self.api.get_source(source_id).await?,
        };
        if source.location.kind() != SourceKind::Upload {
            return Err(ValidationError::new("source", "has no uploaded file").into());
        }
        if source.file_available == Some(false) {
            return Err(ApiError::NotFound(format!("original file of {source_id}")).into());
        }

        match self.api.download_file(source_id).await {
            Ok(mut file) => {
                self.notifier.set_file_available(source_id, true);
                if file.file_name.is_none() {
                    file.file_name = Some(source.fallback_file_name());
                }
                info!(bytes = file.bytes.len(), "original file downloaded");
                Ok(file)
            }
            Err(ApiError::NotFound(what)) => {
                warn!("original file is no longer on the server");
                self.notifier.set_file_available(source_id, false);
                Err(ApiError::NotFound(what).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-run exactly one failed stage. `Create` cannot be retried.
    pub async fn retry_stage(
        &self,
        source_id: &str,
        payload: RetryPayload,
    ) -> Result<(), IngestionError> {
        self.runner.retry(source_id, payload).await
    }

    /// Apply one transformation to an existing source and return the refreshed view.
    ///
    /// The transformation error, if any, takes precedence over a failed refresh.
    #[instrument(skip(self))]
    pub async fn apply_transformation(
        &self,
        source_id: &str,
        transformation_id: &str,
    ) -> Result<Option<EnrichmentState>, IngestionError> {
        self.runner
            .retry(
                source_id,
                RetryPayload::Transform {
                    transformation_id: transformation_id.to_string(),
                },
            )
            .await?;
        info!("transformation applied");

        match self.reconcile(source_id).await {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(error = %e, "insight list refresh failed");
                Ok(None)
            }
        }
    }
}
