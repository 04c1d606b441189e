//! Source edits, notes, and notebooks.
//!
//! None of these go through the ingestion pipeline, but each one reports its
//! change to the [`Notifier`] exactly like a pipeline stage does.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument};

use sourceflow_shared::{
    NewNote, Note, NoteKind, NoteUpdate, NotebookApi, NotebookUpdate, Result, ValidationError,
};

use crate::ledger::Ledger;
use crate::notifier::{Mutation, Notifier};

const NOTE_PREFIX: &str = "note:";

/// Note editor input. `note_id: None` creates a new note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    pub note_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    /// Required to create; used for invalidation when editing.
    pub notebook_id: Option<String>,
}

/// Bare record ids gain the `note:` table prefix the service expects.
pub fn normalize_note_id(id: &str) -> String {
    if id.contains(':') {
        id.to_string()
    } else {
        format!("{NOTE_PREFIX}{id}")
    }
}

fn clean_title(title: Option<&str>) -> Option<String> {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn one(notebook_id: Option<&str>) -> Option<BTreeSet<String>> {
    notebook_id.map(|id| BTreeSet::from([id.to_string()]))
}

/// Writes outside the ingestion pipeline.
#[derive(Debug)]
pub struct MutationService<A> {
    api: Arc<A>,
    ledger: Ledger,
    notifier: Notifier,
}

impl<A: NotebookApi> MutationService<A> {
    pub(crate) fn new(api: Arc<A>, ledger: Ledger, notifier: Notifier) -> Self {
        Self {
            api,
            ledger,
            notifier,
        }
    }

    /// Change a source's title. Returns `false` without writing when unchanged.
    #[instrument(skip(self))]
    pub async fn rename_source(&self, source_id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::new("title", "title is required").into());
        }

        let source = self.api.get_source(source_id).await?;
        if source.title.as_deref() == Some(title) {
            return Ok(false);
        }

        self.api.update_source_title(source_id, title).await?;
        info!("source renamed");
        self.notifier.invalidate(Mutation::SourceUpdated {
            source_id: source_id.to_string(),
            notebook_ids: source.notebooks,
        });
        Ok(true)
    }

    /// Delete a source and drop everything tracked locally for it.
    #[instrument(skip(self))]
    pub async fn delete_source(&self, source_id: &str) -> Result<()> {
        let notebook_ids = self
            .notifier
            .cached(source_id)
            .map(|view| view.state.source.notebooks);

        self.api.delete_source(source_id).await?;
        self.ledger.forget(source_id);
        info!("source deleted");
        self.notifier.invalidate(Mutation::SourceDeleted {
            source_id: source_id.to_string(),
            notebook_ids,
        });
        Ok(())
    }

    /// Create or update a note, depending on `draft.note_id`.
    #[instrument(skip_all, fields(note_id = ?draft.note_id))]
    pub async fn save_note(&self, draft: &NoteDraft) -> Result<Note> {
        if draft.content.trim().is_empty() {
            return Err(ValidationError::new("content", "content is required").into());
        }
        let title = clean_title(draft.title.as_deref());

        let note = match &draft.note_id {
            Some(id) => {
                let id = normalize_note_id(id);
                let update = NoteUpdate {
                    title,
                    content: draft.content.clone(),
                };
                self.api.update_note(&id, &update).await?
            }
            None => {
                let notebook_id = draft
                    .notebook_id
                    .clone()
                    .ok_or_else(|| ValidationError::new("notebook", "a notebook is required"))?;
                let new = NewNote {
                    title,
                    content: draft.content.clone(),
                    note_type: NoteKind::Human,
                    notebook_id,
                };
                self.api.create_note(&new).await?
            }
        };

        info!(id = %note.id, "note saved");
        self.notifier.invalidate(Mutation::NoteChanged {
            note_id: Some(note.id.clone()),
            notebook_ids: one(draft.notebook_id.as_deref()),
        });
        Ok(note)
    }

    /// Save an answer as an `ai` note into each notebook, one after another.
    ///
    /// Stops at the first failure; notes already created are kept.
    #[instrument(skip(self, question, answer))]
    pub async fn save_to_notebooks(
        &self,
        question: &str,
        answer: &str,
        notebook_ids: &[String],
    ) -> Result<Vec<Note>> {
        if notebook_ids.is_empty() {
            return Err(ValidationError::new("notebook", "select at least one notebook").into());
        }
        if answer.trim().is_empty() {
            return Err(ValidationError::new("content", "content is required").into());
        }

        let mut saved = Vec::with_capacity(notebook_ids.len());
        let mut touched = BTreeSet::new();
        let mut outcome = Ok(());

        for notebook_id in notebook_ids {
            let new = NewNote {
                title: clean_title(Some(question)),
                content: answer.to_string(),
                note_type: NoteKind::Ai,
                notebook_id: notebook_id.clone(),
            };
            match self.api.create_note(&new).await {
                Ok(note) => {
                    touched.insert(notebook_id.clone());
                    saved.push(note);
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if !touched.is_empty() {
            self.notifier.invalidate(Mutation::NoteChanged {
                note_id: None,
                notebook_ids: Some(touched),
            });
        }
        outcome?;
        info!(count = saved.len(), "answer saved to notebooks");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn delete_note(&self, note_id: &str, notebook_id: Option<&str>) -> Result<()> {
        let id = normalize_note_id(note_id);
        self.api.delete_note(&id).await?;
        self.notifier.invalidate(Mutation::NoteChanged {
            note_id: Some(id),
            notebook_ids: one(notebook_id),
        });
        Ok(())
    }

    #[instrument(skip(self, update))]
    pub async fn update_notebook(&self, notebook_id: &str, update: &NotebookUpdate) -> Result<()> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ValidationError::new("name", "name must not be empty").into());
        }
        self.api.update_notebook(notebook_id, update).await?;
        self.notifier.invalidate(Mutation::NotebookChanged {
            notebook_id: notebook_id.to_string(),
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_notebook(&self, notebook_id: &str) -> Result<()> {
        self.api.delete_notebook(notebook_id).await?;
        info!("notebook deleted");
        self.notifier.invalidate(Mutation::NotebookDeleted {
            notebook_id: notebook_id.to_string(),
        });
        Ok(())
    }
}
