//! Available transformations and the active embedding policy.
//!
//! Read-only. When the service cannot be reached, callers degrade to offering
//! no transformations and letting the user's embed choice stand; source
//! creation is never blocked on capabilities.

use std::sync::Arc;

use tracing::warn;

use sourceflow_shared::{ApiError, ApiResult, EmbeddingPolicy, NotebookApi, Transformation};

/// How the embed option should be presented when adding a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedChoice {
    /// Show a checkbox; the user decides.
    UserChoice,
    /// Embedding happens regardless; show it as enabled.
    ForcedOn,
    /// Embedding never happens; show it as disabled.
    ForcedOff,
}

impl From<EmbeddingPolicy> for EmbedChoice {
    fn from(policy: EmbeddingPolicy) -> Self {
        match policy {
            EmbeddingPolicy::Ask => Self::UserChoice,
            EmbeddingPolicy::Always => Self::ForcedOn,
            EmbeddingPolicy::Never => Self::ForcedOff,
        }
    }
}

/// Snapshot of what the service offers, with failures folded in.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Empty when unavailable.
    pub transformations: Vec<Transformation>,
    /// `None` when settings could not be read.
    pub embedding_policy: Option<EmbeddingPolicy>,
    /// Errors encountered while loading, for an "unavailable" notice.
    pub errors: Vec<ApiError>,
}

impl Capabilities {
    pub fn is_available(&self) -> bool {
        self.errors.is_empty()
    }

    /// Unknown policy is presented as a user choice.
    pub fn embed_choice(&self) -> EmbedChoice {
        self.embedding_policy.unwrap_or_default().into()
    }

    /// Transformations marked `apply_default`, in listing order.
    pub fn default_selection(&self) -> Vec<String> {
        self.transformations
            .iter()
            .filter(|t| t.apply_default)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn find(&self, transformation_id: &str) -> Option<&Transformation> {
        self.transformations
            .iter()
            .find(|t| t.id == transformation_id)
    }
}

/// Read access to transformations and settings.
#[derive(Debug)]
pub struct CapabilityRegistry<A> {
    api: Arc<A>,
}

impl<A> Clone for CapabilityRegistry<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: NotebookApi> CapabilityRegistry<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    pub async fn list_transformations(&self) -> ApiResult<Vec<Transformation>> {
        self.api.list_transformations().await
    }

    pub async fn embedding_policy(&self) -> ApiResult<EmbeddingPolicy> {
        Ok(self.api.get_settings().await?.default_embedding_option)
    }

    /// Load both capabilities, never failing.
    pub async fn load(&self) -> Capabilities {
        let (transformations, policy) =
            tokio::join!(self.list_transformations(), self.embedding_policy());

        let mut caps = Capabilities::default();
        match transformations {
            Ok(list) => caps.transformations = list,
            Err(e) => {
                warn!(error = %e, "transformations unavailable, offering none");
                caps.errors.push(e);
            }
        }
        match policy {
            Ok(policy) => caps.embedding_policy = Some(policy),
            Err(e) => {
                warn!(error = %e, "embedding policy unavailable");
                caps.errors.push(e);
            }
        }
        caps
    }
}
