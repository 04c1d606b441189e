//! Ingestion pipeline: create → associate → transform → embed.
//!
//! Stages run strictly in order. Only `Create` is fatal; every later stage
//! records its own [`StageOutcome`] and the pipeline moves on. Once `Create`
//! has succeeded it is never repeated; failed stages are retried one at a
//! time through [`StageRunner::retry`] with the same semantics they have here.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use sourceflow_shared::{
    ApiError, EmbedKind, EmbeddingPolicy, IngestionError, IngestionId, IngestionRequest, Insight,
    NotebookApi, Source, Stage,
};

use crate::capabilities::CapabilityRegistry;
use crate::ledger::Ledger;
use crate::notifier::{Mutation, Notifier};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one non-fatal stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed(ApiError),
    /// Nothing to do, or the embedding policy ruled it out. No request was sent.
    Skipped,
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn from_result<T>(result: &Result<T, ApiError>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) => Self::Failed(e.clone()),
        }
    }
}

/// Outcome of one requested transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationOutcome {
    pub transformation_id: String,
    pub outcome: StageOutcome,
    /// The created insight when the request succeeded.
    pub insight: Option<Insight>,
}

/// Per-stage outcomes after `Create` succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub associate: StageOutcome,
    /// In the order the transformations were requested.
    pub transform: Vec<TransformationOutcome>,
    pub embed: StageOutcome,
}

impl StageReport {
    pub fn transformation(&self, transformation_id: &str) -> Option<&StageOutcome> {
        self.transform
            .iter()
            .find(|t| t.transformation_id == transformation_id)
            .map(|t| &t.outcome)
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.associate.is_failed() {
            stages.push(Stage::Associate);
        }
        if self.transform.iter().any(|t| t.outcome.is_failed()) {
            stages.push(Stage::Transform);
        }
        if self.embed.is_failed() {
            stages.push(Stage::Embed);
        }
        stages
    }

    pub fn is_complete(&self) -> bool {
        self.failed_stages().is_empty()
    }
}

/// Whether every requested stage succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Partial,
}

/// What to re-run for one failed stage. `Create` cannot be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPayload {
    Associate { notebook_ids: BTreeSet<String> },
    Transform { transformation_id: String },
    Embed,
}

impl RetryPayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Associate { .. } => Stage::Associate,
            Self::Transform { .. } => Stage::Transform,
            Self::Embed => Stage::Embed,
        }
    }
}

/// Result of a completed `ingest` call (Create succeeded).
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub ingestion_id: IngestionId,
    /// The created source, updated from this run's own stage results.
    pub source: Source,
    pub stages: StageReport,
    pub completion: Completion,
    /// Notebooks the request asked for, kept so Associate can be retried.
    pub requested_notebooks: BTreeSet<String>,
    pub elapsed: Duration,
}

impl IngestionReport {
    /// Insights created during this run, in request order.
    pub fn insights(&self) -> impl Iterator<Item = &Insight> {
        self.stages.transform.iter().filter_map(|t| t.insight.as_ref())
    }

    /// One payload per failed stage (one per failed transformation).
    pub fn retry_plan(&self) -> Vec<RetryPayload> {
        let mut plan = Vec::new();
        if self.stages.associate.is_failed() {
            plan.push(RetryPayload::Associate {
                notebook_ids: self.requested_notebooks.clone(),
            });
        }
        plan.extend(
            self.stages
                .transform
                .iter()
                .filter(|t| t.outcome.is_failed())
                .map(|t| RetryPayload::Transform {
                    transformation_id: t.transformation_id.clone(),
                }),
        );
        if self.stages.embed.is_failed() {
            plan.push(RetryPayload::Embed);
        }
        plan
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage begins.
    fn stage_started(&self, stage: Stage);
    /// Called before each transformation request.
    fn transformation(&self, transformation_id: &str, current: usize, total: usize);
    /// Called when a non-fatal stage resolves.
    fn stage_finished(&self, stage: Stage, outcome: &StageOutcome);
    /// Called when the pipeline completes.
    fn done(&self, report: &IngestionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn transformation(&self, _transformation_id: &str, _current: usize, _total: usize) {}
    fn stage_finished(&self, _stage: Stage, _outcome: &StageOutcome) {}
    fn done(&self, _report: &IngestionReport) {}
}

// ---------------------------------------------------------------------------
// Stage runner
// ---------------------------------------------------------------------------

/// Executes individual non-fatal stages. Shared by `ingest` and retries.
#[derive(Debug)]
pub struct StageRunner<A> {
    api: Arc<A>,
    registry: CapabilityRegistry<A>,
    ledger: Ledger,
    notifier: Notifier,
}

impl<A> Clone for StageRunner<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            registry: self.registry.clone(),
            ledger: self.ledger.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<A: NotebookApi> StageRunner<A> {
    pub(crate) fn new(api: Arc<A>, ledger: Ledger, notifier: Notifier) -> Self {
        Self {
            registry: CapabilityRegistry::new(Arc::clone(&api)),
            api,
            ledger,
            notifier,
        }
    }

    /// Notebook membership known for invalidation: the store's plus requested.
    fn membership(&self, source_id: &str, extra: &BTreeSet<String>) -> BTreeSet<String> {
        let mut ids = extra.clone();
        if let Some(view) = self.notifier.cached(source_id) {
            ids.extend(view.state.source.notebooks);
        }
        ids
    }

    async fn associate(&self, source_id: &str, notebook_ids: &BTreeSet<String>) -> StageOutcome {
        if notebook_ids.is_empty() {
            return StageOutcome::Skipped;
        }

        let result = self.api.associate_notebooks(source_id, notebook_ids).await;
        if let Err(e) = &result {
            warn!(source_id, error = %e, "notebook association failed");
        }

        self.notifier.invalidate(Mutation::NotebooksAssociated {
            source_id: source_id.to_string(),
            notebook_ids: self.membership(source_id, notebook_ids),
        });
        StageOutcome::from_result(&result)
    }

    async fn transform_one(
        &self,
        source_id: &str,
        transformation_id: &str,
    ) -> TransformationOutcome {
        self.ledger.transform_started(source_id, transformation_id);
        let result = self.api.create_insight(source_id, transformation_id).await;
        self.ledger.transform_finished(source_id, transformation_id);

        if let Err(e) = &result {
            warn!(source_id, transformation_id, error = %e, "transformation failed");
        }

        TransformationOutcome {
            transformation_id: transformation_id.to_string(),
            outcome: StageOutcome::from_result(&result),
            insight: result.ok(),
        }
    }

    /// One request at a time, in request order.
    async fn transform(
        &self,
        source_id: &str,
        transformation_ids: &[String],
        notebook_ids: &BTreeSet<String>,
        progress: &dyn ProgressReporter,
    ) -> Vec<TransformationOutcome> {
        let ids = dedup_in_order(transformation_ids);
        let mut outcomes = Vec::with_capacity(ids.len());

        for (i, transformation_id) in ids.iter().enumerate() {
            progress.transformation(transformation_id, i + 1, ids.len());
            outcomes.push(self.transform_one(source_id, transformation_id).await);
        }

        if !ids.is_empty() {
            self.notifier.invalidate(Mutation::InsightsChanged {
                source_id: source_id.to_string(),
                notebook_ids: self.membership(source_id, notebook_ids),
            });
        }
        outcomes
    }

    /// Unreadable settings leave the user's request in charge.
    async fn effective_policy(&self) -> EmbeddingPolicy {
        match self.registry.embedding_policy().await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(error = %e, "embedding policy unavailable, honoring request");
                EmbeddingPolicy::Ask
            }
        }
    }

    async fn embed(
        &self,
        source_id: &str,
        requested: bool,
        notebook_ids: &BTreeSet<String>,
    ) -> StageOutcome {
        let policy = self.effective_policy().await;
        if !policy.should_embed(requested) {
            info!(source_id, ?policy, requested, "embedding skipped");
            return StageOutcome::Skipped;
        }

        self.ledger.embed_started(source_id);
        let result = self.api.embed_content(source_id, EmbedKind::Source).await;
        self.ledger.embed_finished(source_id, result.is_ok());

        match &result {
            Ok(ack) => info!(source_id, message = %ack.message, "embedding accepted"),
            Err(e) => warn!(source_id, error = %e, "embedding request failed"),
        }

        self.notifier.invalidate(Mutation::EmbeddingRequested {
            source_id: source_id.to_string(),
            notebook_ids: self.membership(source_id, notebook_ids),
        });
        StageOutcome::from_result(&result)
    }

    /// The store has already reported this source as embedded.
    fn known_embedded(&self, source_id: &str) -> bool {
        self.notifier
            .cached(source_id)
            .is_some_and(|view| view.state.source.embedded)
    }

    /// Re-run exactly one stage for an existing source. Never touches `Create`.
    ///
    /// A retried Embed is a request to embed, still subject to policy: under
    /// `Never` it is skipped and reported as success. It is also skipped when
    /// the source is already known to be embedded.
    #[instrument(skip(self), fields(stage = %payload.stage()))]
    pub async fn retry(
        &self,
        source_id: &str,
        payload: RetryPayload,
    ) -> Result<(), IngestionError> {
        let _claim = self
            .ledger
            .claim(source_id)
            .ok_or_else(|| IngestionError::InFlight {
                source_id: source_id.to_string(),
            })?;

        let stage = payload.stage();
        let outcome = match &payload {
            RetryPayload::Associate { notebook_ids } => {
                self.associate(source_id, notebook_ids).await
            }
            RetryPayload::Transform { transformation_id } => {
                let outcome = self.transform_one(source_id, transformation_id).await;
                self.notifier.invalidate(Mutation::InsightsChanged {
                    source_id: source_id.to_string(),
                    notebook_ids: self.membership(source_id, &BTreeSet::new()),
                });
                outcome.outcome
            }
            RetryPayload::Embed if self.known_embedded(source_id) => {
                info!(source_id, "source already embedded, nothing to retry");
                StageOutcome::Skipped
            }
            RetryPayload::Embed => self.embed(source_id, true, &BTreeSet::new()).await,
        };

        match outcome {
            StageOutcome::Failed(cause) => Err(IngestionError::Stage {
                stage,
                source_id: source_id.to_string(),
                cause,
            }),
            StageOutcome::Succeeded | StageOutcome::Skipped => {
                info!(source_id, "stage retry finished");
                Ok(())
            }
        }
    }
}

fn dedup_in_order(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Sequences the ingestion stages for one request at a time per source.
#[derive(Debug)]
pub struct IngestionPipeline<A> {
    api: Arc<A>,
    runner: StageRunner<A>,
    ledger: Ledger,
    notifier: Notifier,
}

impl<A: NotebookApi> IngestionPipeline<A> {
    pub(crate) fn new(runner: StageRunner<A>) -> Self {
        Self {
            api: Arc::clone(&runner.api),
            ledger: runner.ledger.clone(),
            notifier: runner.notifier.clone(),
            runner,
        }
    }

    pub fn runner(&self) -> &StageRunner<A> {
        &self.runner
    }

    /// Run the pipeline for `request`.
    ///
    /// 1. Create the source (fatal on failure)
    /// 2. Associate notebooks, if any
    /// 3. Request each transformation, sequentially
    /// 4. Request embedding, if asked or forced by policy
    #[instrument(skip_all, fields(ingestion_id, kind = %request.draft.kind()))]
    pub async fn ingest(
        &self,
        request: &IngestionRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport, IngestionError> {
        let start = Instant::now();
        let ingestion_id = IngestionId::new();
        tracing::Span::current().record("ingestion_id", tracing::field::display(&ingestion_id));

        info!(
            notebooks = request.notebook_ids.len(),
            transformations = request.transformation_ids.len(),
            embed = request.embed,
            "starting ingestion"
        );

        // --- Stage 1: Create ---
        progress.stage_started(Stage::Create);
        let mut source = self
            .api
            .create_source(&request.draft, request.options)
            .await
            .map_err(|cause| {
                warn!(error = %cause, "source creation failed, nothing persisted");
                IngestionError::Create { cause }
            })?;
        let source_id = source.id.clone();
        info!(%source_id, "source created");

        let Some(claim) = self.ledger.claim(&source_id) else {
            warn!(%source_id, "source already claimed by a concurrent retry");
            return Err(IngestionError::InFlight { source_id });
        };

        self.notifier.invalidate(Mutation::SourceCreated {
            source_id: source_id.clone(),
            notebook_ids: source
                .notebooks
                .union(&request.notebook_ids)
                .cloned()
                .collect(),
        });

        // --- Stage 2: Associate ---
        progress.stage_started(Stage::Associate);
        let associate = self
            .runner
            .associate(&source_id, &request.notebook_ids)
            .await;
        if associate == StageOutcome::Succeeded {
            source.notebooks.extend(request.notebook_ids.iter().cloned());
        }
        progress.stage_finished(Stage::Associate, &associate);

        let membership: BTreeSet<String> = source
            .notebooks
            .union(&request.notebook_ids)
            .cloned()
            .collect();

        // --- Stage 3: Transform ---
        progress.stage_started(Stage::Transform);
        let transform = self
            .runner
            .transform(&source_id, &request.transformation_ids, &membership, progress)
            .await;
        let transform_outcome = if transform.is_empty() {
            StageOutcome::Skipped
        } else {
            transform
                .iter()
                .find(|t| t.outcome.is_failed())
                .map(|t| t.outcome.clone())
                .unwrap_or(StageOutcome::Succeeded)
        };
        progress.stage_finished(Stage::Transform, &transform_outcome);

        // --- Stage 4: Embed ---
        progress.stage_started(Stage::Embed);
        let embed = self
            .runner
            .embed(&source_id, request.embed, &membership)
            .await;
        if embed == StageOutcome::Succeeded {
            source.embedded = true;
        }
        progress.stage_finished(Stage::Embed, &embed);

        let stages = StageReport {
            associate,
            transform,
            embed,
        };
        let completion = if stages.is_complete() {
            Completion::Complete
        } else {
            Completion::Partial
        };

        let report = IngestionReport {
            ingestion_id,
            source,
            stages,
            completion,
            requested_notebooks: request.notebook_ids.clone(),
            elapsed: start.elapsed(),
        };

        drop(claim);
        progress.done(&report);

        info!(
            %source_id,
            ?completion,
            failed = ?report.stages.failed_stages(),
            elapsed_ms = report.elapsed.as_millis(),
            "ingestion finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SourceFields, build};
    use crate::testing::{Call, FakeApi, Op, sample_state};
    use sourceflow_shared::SourceKind;

    fn pipeline(api: &Arc<FakeApi>) -> IngestionPipeline<FakeApi> {
        IngestionPipeline::new(StageRunner::new(
            Arc::clone(api),
            Ledger::new(),
            Notifier::new(),
        ))
    }

    fn link_request(
        notebooks: &[&str],
        transformations: &[&str],
        embed: bool,
    ) -> IngestionRequest {
        let draft = build(SourceKind::Link, &SourceFields::link("https://example.com/a")).unwrap();
        IngestionRequest {
            notebook_ids: notebooks.iter().map(|s| s.to_string()).collect(),
            transformation_ids: transformations.iter().map(|s| s.to_string()).collect(),
            embed,
            ..IngestionRequest::create_only(draft)
        }
    }

    #[tokio::test]
    async fn create_only_is_complete() {
        let api = Arc::new(FakeApi::new());
        let report = pipeline(&api)
            .ingest(&link_request(&[], &[], false), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completion, Completion::Complete);
        assert_eq!(report.stages.associate, StageOutcome::Skipped);
        assert!(report.stages.transform.is_empty());
        assert_eq!(report.stages.embed, StageOutcome::Skipped);
        assert_eq!(api.count(|c| matches!(c, Call::Associate(..))), 0);
        assert_eq!(api.count(|c| matches!(c, Call::Embed(_))), 0);
    }

    #[tokio::test]
    async fn full_success() {
        let api = Arc::new(FakeApi::new());
        let report = pipeline(&api)
            .ingest(&link_request(&["nb1"], &["t1"], true), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completion, Completion::Complete);
        assert!(report.source.embedded);
        assert!(report.source.notebooks.contains("nb1"));
        let insights: Vec<_> = report.insights().collect();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].transformation_id, "t1");
    }

    #[tokio::test]
    async fn stages_reach_the_store_in_order() {
        let api = Arc::new(FakeApi::new().with_next_source_id("source:ordered"));
        pipeline(&api)
            .ingest(&link_request(&["nb1"], &["t1"], true), &SilentProgress)
            .await
            .unwrap();

        let id = "source:ordered".to_string();
        assert_eq!(
            api.calls(),
            vec![
                Call::CreateSource,
                Call::Associate(id.clone(), ["nb1".to_string()].into()),
                Call::CreateInsight(id.clone(), "t1".into()),
                Call::GetSettings,
                Call::Embed(id),
            ]
        );
    }

    #[tokio::test]
    async fn ingest_stops_when_source_is_claimed() {
        let api = Arc::new(FakeApi::new().with_next_source_id("source:busy"));
        let pipeline = pipeline(&api);
        let _claim = pipeline.ledger.claim("source:busy");

        let err = pipeline
            .ingest(&link_request(&["nb1"], &["t1"], true), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IngestionError::InFlight {
                source_id: "source:busy".into()
            }
        );
        assert_eq!(api.calls(), vec![Call::CreateSource]);
    }

    #[tokio::test]
    async fn create_failure_is_fatal() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::CreateSource, true);

        let err = pipeline(&api)
            .ingest(&link_request(&["nb1"], &["t1"], true), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::Create { .. }));
        assert_eq!(api.calls(), vec![Call::CreateSource]);
    }

    #[tokio::test]
    async fn associate_failure_is_partial_and_continues() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::Associate, true);

        let report = pipeline(&api)
            .ingest(&link_request(&["nb1"], &["t1"], true), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completion, Completion::Partial);
        assert!(!report.source.id.is_empty());
        assert!(report.stages.associate.is_failed());
        assert_eq!(report.stages.transformation("t1"), Some(&StageOutcome::Succeeded));
        assert_eq!(report.stages.embed, StageOutcome::Succeeded);
        assert_eq!(report.stages.failed_stages(), vec![Stage::Associate]);
    }

    #[tokio::test]
    async fn transformation_failures_are_independent() {
        let api = Arc::new(FakeApi::new());
        api.fail_transformation("B", true);

        let report = pipeline(&api)
            .ingest(&link_request(&[], &["A", "B", "C"], false), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completion, Completion::Partial);
        assert_eq!(report.stages.transformation("A"), Some(&StageOutcome::Succeeded));
        assert!(report.stages.transformation("B").unwrap().is_failed());
        assert_eq!(report.stages.transformation("C"), Some(&StageOutcome::Succeeded));

        let order: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateInsight(_, t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);

        assert_eq!(
            report.retry_plan(),
            vec![RetryPayload::Transform {
                transformation_id: "B".into()
            }]
        );
    }

    #[tokio::test]
    async fn duplicate_transformations_run_once() {
        let api = Arc::new(FakeApi::new());
        let report = pipeline(&api)
            .ingest(&link_request(&[], &["A", "B", "A"], false), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.stages.transform.len(), 2);
        assert_eq!(api.count(|c| matches!(c, Call::CreateInsight(..))), 2);
    }

    #[tokio::test]
    async fn never_policy_skips_embed_without_calling() {
        let api = Arc::new(FakeApi::new().with_policy(EmbeddingPolicy::Never));
        let report = pipeline(&api)
            .ingest(&link_request(&[], &[], true), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.stages.embed, StageOutcome::Skipped);
        assert_eq!(report.completion, Completion::Complete);
        assert_eq!(api.count(|c| matches!(c, Call::Embed(_))), 0);
        assert!(!report.source.embedded);
    }

    #[tokio::test]
    async fn always_policy_embeds_without_request() {
        let api = Arc::new(FakeApi::new().with_policy(EmbeddingPolicy::Always));
        let report = pipeline(&api)
            .ingest(&link_request(&[], &[], false), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.stages.embed, StageOutcome::Succeeded);
        assert_eq!(api.count(|c| matches!(c, Call::Embed(_))), 1);
    }

    #[tokio::test]
    async fn unreadable_policy_honors_request() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::GetSettings, true);
        let report = pipeline(&api)
            .ingest(&link_request(&[], &[], true), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.stages.embed, StageOutcome::Succeeded);
    }

    #[tokio::test]
    async fn embed_failure_is_recorded() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::Embed, true);
        let report = pipeline(&api)
            .ingest(&link_request(&[], &["t1"], true), &SilentProgress)
            .await
            .unwrap();
        assert!(report.stages.embed.is_failed());
        assert!(!report.source.embedded);
        assert_eq!(report.retry_plan(), vec![RetryPayload::Embed]);
    }

    #[tokio::test]
    async fn retry_associate_does_not_recreate() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::Associate, true);
        let pipeline = pipeline(&api);

        let report = pipeline
            .ingest(&link_request(&["nb1"], &[], false), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.completion, Completion::Partial);

        api.set_failing(Op::Associate, false);
        let plan = report.retry_plan();
        assert_eq!(plan.len(), 1);
        for payload in plan {
            pipeline
                .runner()
                .retry(&report.source.id, payload)
                .await
                .unwrap();
        }

        assert_eq!(api.count(|c| matches!(c, Call::CreateSource)), 1);
        assert_eq!(api.count(|c| matches!(c, Call::Associate(..))), 2);
    }

    #[tokio::test]
    async fn retry_failure_returns_stage_error() {
        let api = Arc::new(FakeApi::new());
        api.set_failing(Op::Embed, true);
        let pipeline = pipeline(&api);
        let report = pipeline
            .ingest(&link_request(&[], &[], true), &SilentProgress)
            .await
            .unwrap();

        let err = pipeline
            .runner()
            .retry(&report.source.id, RetryPayload::Embed)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Embed));
    }

    #[tokio::test]
    async fn retry_is_rejected_while_claimed() {
        let api = Arc::new(FakeApi::new());
        let pipeline = pipeline(&api);
        let _claim = pipeline.ledger.claim("source:busy");

        let err = pipeline
            .runner()
            .retry("source:busy", RetryPayload::Embed)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::InFlight { .. }));
        assert_eq!(api.count(|c| matches!(c, Call::Embed(_))), 0);
    }

    #[tokio::test]
    async fn retry_embed_is_skipped_once_embedded() {
        let api = Arc::new(FakeApi::new());
        let pipeline = pipeline(&api);
        let mut state = sample_state("s1", &["nb1"]);
        state.source.embedded = true;
        pipeline.notifier.store(state);

        pipeline
            .runner()
            .retry("s1", RetryPayload::Embed)
            .await
            .unwrap();
        assert_eq!(api.count(|c| matches!(c, Call::Embed(_))), 0);
        assert_eq!(api.count(|c| matches!(c, Call::GetSettings)), 0);
    }

    #[test]
    fn dedup_preserves_first_occurrence() {
        let ids: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup_in_order(&ids), vec!["b", "a", "c"]);
    }
}
