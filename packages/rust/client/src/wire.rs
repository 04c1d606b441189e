//! JSON shapes exchanged with the notebook service, and their mapping onto
//! domain types.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use sourceflow_shared::{
    ApiError, ApiResult, ConnectionStatus, EmbedAck, EmbeddingPolicy, Insight, Note, NoteKind,
    Settings, Source, SourceLocation, Transformation,
};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AssetBody {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SourceBody {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub asset: Option<AssetBody>,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub file_available: Option<bool>,
    #[serde(default)]
    pub notebooks: Vec<String>,
    pub created: String,
    pub updated: String,
}

impl SourceBody {
    pub fn into_domain(self) -> ApiResult<Source> {
        let asset = self.asset.unwrap_or_default();
        Ok(Source {
            location: SourceLocation::from_asset(asset.url, asset.file_path),
            created: parse_timestamp(&self.created)?,
            updated: parse_timestamp(&self.updated)?,
            id: self.id,
            title: self.title.filter(|t| !t.is_empty()),
            embedded: self.embedded,
            file_available: self.file_available,
            notebooks: self.notebooks.into_iter().collect::<BTreeSet<_>>(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct InsightBody {
    pub id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub transformation_id: Option<String>,
    pub insight_type: String,
    pub content: String,
}

impl InsightBody {
    /// Missing ids are filled from what the request already knows.
    pub fn into_domain(self, source_id: &str, transformation_id: Option<&str>) -> Insight {
        Insight {
            id: self.id,
            source_id: self.source_id.unwrap_or_else(|| source_id.to_string()),
            transformation_id: self
                .transformation_id
                .or_else(|| transformation_id.map(str::to_string))
                .unwrap_or_default(),
            insight_type: self.insight_type,
            content: self.content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransformationBody {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub apply_default: bool,
}

impl From<TransformationBody> for Transformation {
    fn from(body: TransformationBody) -> Self {
        Self {
            title: body.title.unwrap_or_else(|| body.name.clone()),
            id: body.id,
            name: body.name,
            description: body.description.filter(|d| !d.is_empty()),
            apply_default: body.apply_default,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingsBody {
    #[serde(default)]
    pub default_embedding_option: Option<EmbeddingPolicy>,
}

impl From<SettingsBody> for Settings {
    fn from(body: SettingsBody) -> Self {
        Self {
            default_embedding_option: body.default_embedding_option.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateInsightBody<'a> {
    pub transformation_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmbedRequestBody<'a> {
    pub item_id: &'a str,
    pub item_type: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbedResponseBody {
    #[serde(default = "default_success")]
    pub success: bool,
    pub message: String,
}

fn default_success() -> bool {
    true
}

impl EmbedResponseBody {
    /// A 200 with `success: false` is still a rejected request.
    pub fn into_domain(self) -> ApiResult<EmbedAck> {
        if self.success {
            Ok(EmbedAck {
                message: self.message,
            })
        } else {
            Err(ApiError::Status {
                code: 200,
                message: self.message,
            })
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateSourceBody<'a> {
    pub title: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NoteBody {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub note_type: Option<NoteKind>,
}

impl From<NoteBody> for Note {
    fn from(body: NoteBody) -> Self {
        Self {
            id: body.id,
            title: body.title,
            content: body.content,
            note_type: body.note_type.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigBody {
    #[serde(default, rename = "dbStatus", alias = "db_status")]
    pub db_status: Option<String>,
}

impl From<ConfigBody> for ConnectionStatus {
    fn from(body: ConfigBody) -> Self {
        match body.db_status.as_deref() {
            Some("offline") => ConnectionStatus::DatabaseOffline,
            _ => ConnectionStatus::Online,
        }
    }
}

/// `filename` parameter of a `Content-Disposition` header.
pub(crate) fn attachment_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// FastAPI-style error payload.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Accept RFC 3339 as well as the naive timestamps the service emits.
pub(crate) fn parse_timestamp(raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ApiError::Decode(format!("unrecognized timestamp '{raw}'")))
}
