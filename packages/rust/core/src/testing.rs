//! Scripted in-memory [`NotebookApi`] for unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use sourceflow_shared::{
    ApiError, ApiResult, ConnectionStatus, CreateOptions, DownloadedFile, DraftContent, EmbedAck,
    EmbedKind, EmbeddingPolicy, EmbeddingStatus, EnrichmentState, Insight, NewNote, Note,
    NoteUpdate, NotebookApi, NotebookUpdate, Settings, Source, SourceDraft, SourceLocation,
    Transformation,
};

/// Remote operations the fake can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    CreateSource,
    Associate,
    Embed,
    GetSource,
    ListInsights,
    ListTransformations,
    GetSettings,
    DeleteSource,
    UpdateSource,
    CreateNote,
    UpdateNote,
    DownloadFile,
}

/// Every call the fake received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateSource,
    Associate(String, BTreeSet<String>),
    CreateInsight(String, String),
    Embed(String),
    GetSource(String),
    ListInsights(String),
    ListTransformations,
    GetSettings,
    DeleteSource(String),
    UpdateSource(String, String),
    CreateNote(String),
    UpdateNote(String),
    DeleteNote(String),
    UpdateNotebook(String),
    DeleteNotebook(String),
    DownloadFile(String),
    CheckConnection,
}

/// Holds the next `get_source` after it has read the store.
#[derive(Default)]
pub(crate) struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct FakeState {
    sources: HashMap<String, Source>,
    insights: HashMap<String, Vec<Insight>>,
    calls: Vec<Call>,
    failing: HashSet<Op>,
    failing_transformations: HashSet<String>,
    policy: EmbeddingPolicy,
    transformations: Vec<Transformation>,
    embed_completes: bool,
    next_source_id: Option<String>,
    read_gate: Option<Arc<Gate>>,
    files: HashMap<String, DownloadedFile>,
}

pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

fn boom(op: &str) -> ApiError {
    ApiError::Status {
        code: 503,
        message: format!("{op} unavailable"),
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_policy(self, policy: EmbeddingPolicy) -> Self {
        self.state().policy = policy;
        self
    }

    pub fn with_transformations(self, ids: &[&str]) -> Self {
        self.state().transformations = ids
            .iter()
            .map(|id| Transformation {
                id: id.to_string(),
                name: id.to_string(),
                title: id.to_uppercase(),
                description: None,
                apply_default: false,
            })
            .collect();
        self
    }

    /// Embed requests flip `Source.embedded` immediately instead of "later".
    pub fn with_instant_embedding(self) -> Self {
        self.state().embed_completes = true;
        self
    }

    /// The next created source gets `id` instead of a generated one.
    pub fn with_next_source_id(self, id: &str) -> Self {
        self.state().next_source_id = Some(id.to_string());
        self
    }

    /// Pause the next `get_source` until the returned gate is released.
    pub fn gate_next_read(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state().read_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn insert_file(&self, source_id: &str, file_name: Option<&str>, bytes: &[u8]) {
        self.state().files.insert(
            source_id.to_string(),
            DownloadedFile {
                file_name: file_name.map(str::to_string),
                bytes: bytes.to_vec(),
            },
        );
    }

    pub fn set_failing(&self, op: Op, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    pub fn fail_transformation(&self, id: &str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_transformations.insert(id.to_string());
        } else {
            state.failing_transformations.remove(id);
        }
    }

    /// Simulate background indexing finishing.
    pub fn complete_embedding(&self, source_id: &str) {
        if let Some(source) = self.state().sources.get_mut(source_id) {
            source.embedded = true;
        }
    }

    pub fn insert_source(&self, source: Source) {
        self.state().sources.insert(source.id.clone(), source);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call, op: Option<Op>) -> ApiResult<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(call);
        match op {
            Some(op) if state.failing.contains(&op) => Err(boom(&format!("{op:?}"))),
            _ => Ok(state),
        }
    }
}

pub(crate) fn sample_source(id: &str, notebooks: &[&str]) -> Source {
    let now = Utc::now();
    Source {
        id: id.to_string(),
        title: Some("Sample".into()),
        location: SourceLocation::Url("https://example.com/a".into()),
        embedded: false,
        file_available: None,
        notebooks: notebooks.iter().map(|s| s.to_string()).collect(),
        created: now,
        updated: now,
    }
}

pub(crate) fn sample_state(id: &str, notebooks: &[&str]) -> EnrichmentState {
    EnrichmentState {
        source: sample_source(id, notebooks),
        embedding_status: EmbeddingStatus::NotEmbedded,
        insights: Vec::new(),
        pending_transformations: BTreeSet::new(),
    }
}

impl NotebookApi for FakeApi {
    async fn create_source(
        &self,
        draft: &SourceDraft,
        _options: CreateOptions,
    ) -> ApiResult<Source> {
        let mut state = self.record(Call::CreateSource, Some(Op::CreateSource))?;
        let now = Utc::now();
        let location = match &draft.content {
            DraftContent::Link(url) => SourceLocation::Url(url.to_string()),
            DraftContent::Upload(file) => {
                SourceLocation::FilePath(file.path().to_string_lossy().into_owned())
            }
            DraftContent::Text(_) => SourceLocation::Inline,
        };
        let id = state
            .next_source_id
            .take()
            .unwrap_or_else(|| format!("source:{}", Uuid::now_v7().simple()));
        let source = Source {
            id,
            title: draft.title.clone(),
            location,
            embedded: false,
            file_available: None,
            notebooks: BTreeSet::new(),
            created: now,
            updated: now,
        };
        state.sources.insert(source.id.clone(), source.clone());
        Ok(source)
    }

    async fn associate_notebooks(
        &self,
        source_id: &str,
        notebook_ids: &BTreeSet<String>,
    ) -> ApiResult<()> {
        let mut state = self.record(
            Call::Associate(source_id.to_string(), notebook_ids.clone()),
            Some(Op::Associate),
        )?;
        let source = state
            .sources
            .get_mut(source_id)
            .ok_or_else(|| ApiError::NotFound(source_id.to_string()))?;
        source.notebooks.extend(notebook_ids.iter().cloned());
        Ok(())
    }

    async fn create_insight(&self, source_id: &str, transformation_id: &str) -> ApiResult<Insight> {
        let mut state = self.record(
            Call::CreateInsight(source_id.to_string(), transformation_id.to_string()),
            None,
        )?;
        if state.failing_transformations.contains(transformation_id) {
            return Err(boom(transformation_id));
        }
        let insight = Insight {
            id: format!("source_insight:{}", Uuid::now_v7().simple()),
            source_id: source_id.to_string(),
            transformation_id: transformation_id.to_string(),
            insight_type: transformation_id.to_uppercase(),
            content: format!("{transformation_id} of {source_id}"),
        };
        state
            .insights
            .entry(source_id.to_string())
            .or_default()
            .push(insight.clone());
        Ok(insight)
    }

    async fn embed_content(&self, item_id: &str, _kind: EmbedKind) -> ApiResult<EmbedAck> {
        let mut state = self.record(Call::Embed(item_id.to_string()), Some(Op::Embed))?;
        if state.embed_completes {
            if let Some(source) = state.sources.get_mut(item_id) {
                source.embedded = true;
            }
        }
        Ok(EmbedAck {
            message: "Embedding started".into(),
        })
    }

    async fn get_source(&self, source_id: &str) -> ApiResult<Source> {
        let (source, gate) = {
            let mut state =
                self.record(Call::GetSource(source_id.to_string()), Some(Op::GetSource))?;
            let source = state
                .sources
                .get(source_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(source_id.to_string()));
            (source, state.read_gate.take())
        };
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        source
    }

    async fn list_insights(&self, source_id: &str) -> ApiResult<Vec<Insight>> {
        let state = self.record(
            Call::ListInsights(source_id.to_string()),
            Some(Op::ListInsights),
        )?;
        Ok(state.insights.get(source_id).cloned().unwrap_or_default())
    }

    async fn list_transformations(&self) -> ApiResult<Vec<Transformation>> {
        let state = self.record(Call::ListTransformations, Some(Op::ListTransformations))?;
        Ok(state.transformations.clone())
    }

    async fn get_settings(&self) -> ApiResult<Settings> {
        let state = self.record(Call::GetSettings, Some(Op::GetSettings))?;
        Ok(Settings {
            default_embedding_option: state.policy,
        })
    }

    async fn delete_source(&self, source_id: &str) -> ApiResult<()> {
        let mut state = self.record(
            Call::DeleteSource(source_id.to_string()),
            Some(Op::DeleteSource),
        )?;
        state.sources.remove(source_id);
        state.insights.remove(source_id);
        Ok(())
    }

    async fn update_source_title(&self, source_id: &str, title: &str) -> ApiResult<()> {
        let mut state = self.record(
            Call::UpdateSource(source_id.to_string(), title.to_string()),
            Some(Op::UpdateSource),
        )?;
        if let Some(source) = state.sources.get_mut(source_id) {
            source.title = Some(title.to_string());
        }
        Ok(())
    }

    async fn create_note(&self, note: &NewNote) -> ApiResult<Note> {
        let _state = self.record(Call::CreateNote(note.notebook_id.clone()), Some(Op::CreateNote))?;
        Ok(Note {
            id: format!("note:{}", Uuid::now_v7().simple()),
            title: note.title.clone(),
            content: Some(note.content.clone()),
            note_type: note.note_type,
        })
    }

    async fn update_note(&self, note_id: &str, update: &NoteUpdate) -> ApiResult<Note> {
        let _state = self.record(Call::UpdateNote(note_id.to_string()), Some(Op::UpdateNote))?;
        Ok(Note {
            id: note_id.to_string(),
            title: update.title.clone(),
            content: Some(update.content.clone()),
            note_type: Default::default(),
        })
    }

    async fn delete_note(&self, note_id: &str) -> ApiResult<()> {
        let _state = self.record(Call::DeleteNote(note_id.to_string()), None)?;
        Ok(())
    }

    async fn update_notebook(&self, notebook_id: &str, _update: &NotebookUpdate) -> ApiResult<()> {
        let _state = self.record(Call::UpdateNotebook(notebook_id.to_string()), None)?;
        Ok(())
    }

    async fn delete_notebook(&self, notebook_id: &str) -> ApiResult<()> {
        let _state = self.record(Call::DeleteNotebook(notebook_id.to_string()), None)?;
        Ok(())
    }

    async fn download_file(&self, source_id: &str) -> ApiResult<DownloadedFile> {
        let state = self.record(
            Call::DownloadFile(source_id.to_string()),
            Some(Op::DownloadFile),
        )?;
        state
            .files
            .get(source_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{source_id}/download")))
    }

    async fn check_connection(&self) -> ApiResult<ConnectionStatus> {
        let _state = self.record(Call::CheckConnection, None)?;
        Ok(ConnectionStatus::Online)
    }
}
