//! Cache invalidation after mutations.
//!
//! [`invalidated_keys`] maps a [`Mutation`] to the views it makes stale. It is
//! pure and conservative: when the exact set of affected notebooks is unknown
//! it widens to [`CacheKey::AllSourceLists`]. The [`Notifier`] applies the
//! result to the enrichment cache and broadcasts it to subscribers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::debug;

use sourceflow_shared::EnrichmentState;

/// Capacity of the invalidation broadcast channel. Slow subscribers lag.
const EVENT_CAPACITY: usize = 256;

/// A cached view the UI may hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// Sources shown inside one notebook.
    SourceList { notebook_id: String },
    /// Every notebook's source list.
    AllSourceLists,
    SourceDetail { source_id: String },
    InsightList { source_id: String },
    NoteList { notebook_id: String },
    /// Every notebook's note list.
    AllNoteLists,
    NoteDetail { note_id: String },
    NotebookList,
    NotebookDetail { notebook_id: String },
}

/// A state change that can leave cached views stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SourceCreated {
        source_id: String,
        notebook_ids: BTreeSet<String>,
    },
    /// Attempted association; emitted on failure too, since some links may exist.
    NotebooksAssociated {
        source_id: String,
        notebook_ids: BTreeSet<String>,
    },
    InsightsChanged {
        source_id: String,
        notebook_ids: BTreeSet<String>,
    },
    EmbeddingRequested {
        source_id: String,
        notebook_ids: BTreeSet<String>,
    },
    SourceUpdated {
        source_id: String,
        notebook_ids: BTreeSet<String>,
    },
    /// `notebook_ids: None` means membership is unknown.
    SourceDeleted {
        source_id: String,
        notebook_ids: Option<BTreeSet<String>>,
    },
    /// `notebook_ids: None` means the owning notebooks are unknown.
    NoteChanged {
        note_id: Option<String>,
        notebook_ids: Option<BTreeSet<String>>,
    },
    NotebookChanged {
        notebook_id: String,
    },
    NotebookDeleted {
        notebook_id: String,
    },
}

fn source_lists(notebook_ids: &BTreeSet<String>) -> impl Iterator<Item = CacheKey> + '_ {
    notebook_ids.iter().map(|id| CacheKey::SourceList {
        notebook_id: id.clone(),
    })
}

fn detail(source_id: &str) -> CacheKey {
    CacheKey::SourceDetail {
        source_id: source_id.to_string(),
    }
}

fn insights(source_id: &str) -> CacheKey {
    CacheKey::InsightList {
        source_id: source_id.to_string(),
    }
}

/// Views made stale by `mutation`. Same input, same set.
pub fn invalidated_keys(mutation: &Mutation) -> BTreeSet<CacheKey> {
    let mut keys = BTreeSet::new();
    match mutation {
        Mutation::SourceCreated {
            source_id,
            notebook_ids,
        }
        | Mutation::NotebooksAssociated {
            source_id,
            notebook_ids,
        }
        | Mutation::EmbeddingRequested {
            source_id,
            notebook_ids,
        }
        | Mutation::SourceUpdated {
            source_id,
            notebook_ids,
        } => {
            keys.insert(detail(source_id));
            keys.extend(source_lists(notebook_ids));
        }
        Mutation::InsightsChanged {
            source_id,
            notebook_ids,
        } => {
            keys.insert(detail(source_id));
            keys.insert(insights(source_id));
            keys.extend(source_lists(notebook_ids));
        }
        Mutation::SourceDeleted {
            source_id,
            notebook_ids,
        } => {
            keys.insert(detail(source_id));
            keys.insert(insights(source_id));
            match notebook_ids {
                Some(ids) => keys.extend(source_lists(ids)),
                None => {
                    keys.insert(CacheKey::AllSourceLists);
                }
            }
        }
        Mutation::NoteChanged {
            note_id,
            notebook_ids,
        } => {
            if let Some(note_id) = note_id {
                keys.insert(CacheKey::NoteDetail {
                    note_id: note_id.clone(),
                });
            }
            match notebook_ids {
                Some(ids) => keys.extend(ids.iter().map(|id| CacheKey::NoteList {
                    notebook_id: id.clone(),
                })),
                None => {
                    keys.insert(CacheKey::AllNoteLists);
                }
            }
        }
        Mutation::NotebookChanged { notebook_id } | Mutation::NotebookDeleted { notebook_id } => {
            keys.insert(CacheKey::NotebookList);
            keys.insert(CacheKey::NotebookDetail {
                notebook_id: notebook_id.clone(),
            });
            keys.insert(CacheKey::SourceList {
                notebook_id: notebook_id.clone(),
            });
            keys.insert(CacheKey::NoteList {
                notebook_id: notebook_id.clone(),
            });
        }
    }
    keys
}

/// Event delivered to subscribers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub mutation: Mutation,
    pub keys: BTreeSet<CacheKey>,
}

/// A cached enrichment view and whether it may be outdated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedView {
    pub state: EnrichmentState,
    pub stale: bool,
}

/// Invalidation counters observed before a fetch.
///
/// A reconciled state is only fresh if neither counter moved while it was
/// being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    source: u64,
    wide: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    views: HashMap<String, CachedView>,
    generations: HashMap<String, u64>,
    /// Bumped by mutations whose affected sources are unknown.
    wide: u64,
}

impl CacheState {
    fn generation(&self, source_id: &str) -> Generation {
        Generation {
            source: self.generations.get(source_id).copied().unwrap_or_default(),
            wide: self.wide,
        }
    }

    fn bump(&mut self, source_id: &str) {
        *self.generations.entry(source_id.to_string()).or_default() += 1;
    }

    fn mark_stale(&mut self, source_id: &str) {
        if let Some(view) = self.views.get_mut(source_id) {
            view.stale = true;
        }
        self.bump(source_id);
    }
}

fn named_source(mutation: &Mutation) -> Option<&str> {
    match mutation {
        Mutation::SourceCreated { source_id, .. }
        | Mutation::NotebooksAssociated { source_id, .. }
        | Mutation::InsightsChanged { source_id, .. }
        | Mutation::EmbeddingRequested { source_id, .. }
        | Mutation::SourceUpdated { source_id, .. }
        | Mutation::SourceDeleted { source_id, .. } => Some(source_id.as_str()),
        Mutation::NoteChanged { .. }
        | Mutation::NotebookChanged { .. }
        | Mutation::NotebookDeleted { .. } => None,
    }
}

/// Owner of the enrichment cache and the invalidation channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    cache: Arc<Mutex<CacheState>>,
    events: broadcast::Sender<Invalidation>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache: Arc::new(Mutex::new(CacheState::default())),
            events,
        }
    }

    fn cache(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive every future [`Invalidation`].
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.events.subscribe()
    }

    /// Mark affected cached views stale and notify subscribers.
    ///
    /// A second call with the same mutation leaves the cached views as they
    /// were and yields the same key set.
    pub fn invalidate(&self, mutation: Mutation) -> BTreeSet<CacheKey> {
        let keys = invalidated_keys(&mutation);

        {
            let mut cache = self.cache();
            if let Some(source_id) = named_source(&mutation) {
                cache.bump(source_id);
            }
            if matches!(
                mutation,
                Mutation::NotebookChanged { .. } | Mutation::NotebookDeleted { .. }
            ) {
                cache.wide += 1;
            }
            for key in &keys {
                match key {
                    CacheKey::SourceDetail { source_id } | CacheKey::InsightList { source_id } => {
                        cache.mark_stale(source_id);
                    }
                    CacheKey::SourceList { notebook_id } => {
                        let members: Vec<String> = cache
                            .views
                            .values()
                            .filter(|view| view.state.source.notebooks.contains(notebook_id))
                            .map(|view| view.state.source.id.clone())
                            .collect();
                        for source_id in members {
                            cache.mark_stale(&source_id);
                        }
                    }
                    CacheKey::AllSourceLists => {
                        cache.views.values_mut().for_each(|view| view.stale = true);
                        cache.wide += 1;
                    }
                    _ => {}
                }
            }
            // A read of a deleted source may still be in flight; the wide
            // counter keeps it from being cached as fresh.
            if let Mutation::SourceDeleted { source_id, .. } = &mutation {
                cache.views.remove(source_id);
                cache.generations.remove(source_id);
                cache.wide += 1;
            }
        }

        debug!(?mutation, count = keys.len(), "cache keys invalidated");
        // No subscribers is fine.
        let _ = self.events.send(Invalidation {
            mutation,
            keys: keys.clone(),
        });
        keys
    }

    /// Counters to hand back to [`Notifier::store_observed`] after a fetch.
    pub fn generation(&self, source_id: &str) -> Generation {
        self.cache().generation(source_id)
    }

    /// Replace the cached view with a freshly reconciled one.
    pub fn store(&self, state: EnrichmentState) {
        self.cache().views.insert(
            state.source.id.clone(),
            CachedView {
                state,
                stale: false,
            },
        );
    }

    /// Cache a state fetched after `observed` was read.
    ///
    /// The view is stored stale when an invalidation for the source landed
    /// during the fetch. Returns whether the stored view is fresh.
    pub fn store_observed(&self, state: EnrichmentState, observed: Generation) -> bool {
        let mut cache = self.cache();
        let fresh = cache.generation(&state.source.id) == observed;
        if !fresh {
            debug!(source_id = %state.source.id, "invalidated during fetch, caching as stale");
        }
        cache.views.insert(
            state.source.id.clone(),
            CachedView {
                state,
                stale: !fresh,
            },
        );
        fresh
    }

    /// Flag a cached view as possibly outdated without dropping it.
    pub fn mark_outdated(&self, source_id: &str) {
        self.cache().mark_stale(source_id);
    }

    /// Record whether the uploaded original is still downloadable.
    pub fn set_file_available(&self, source_id: &str, available: bool) {
        if let Some(view) = self.cache().views.get_mut(source_id) {
            view.state.source.file_available = Some(available);
        }
    }

    pub fn cached(&self, source_id: &str) -> Option<CachedView> {
        self.cache().views.get(source_id).cloned()
    }
}
