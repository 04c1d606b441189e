//! Validation and normalization of user input into a [`SourceDraft`].
//!
//! Pure: no I/O, same fields in, same draft out.

use url::Url;

use sourceflow_shared::{DraftContent, FileRef, SourceDraft, SourceKind, ValidationError};

/// Raw form input for a new source. Only the field matching the kind may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFields {
    pub title: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
    pub files: Vec<FileRef>,
}

impl SourceFields {
    pub fn link(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn upload(file: FileRef) -> Self {
        Self {
            files: vec![file],
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Validate `fields` for `kind` and produce a draft.
pub fn build(kind: SourceKind, fields: &SourceFields) -> Result<SourceDraft, ValidationError> {
    reject_foreign_fields(kind, fields)?;

    let content = match kind {
        SourceKind::Link => DraftContent::Link(parse_link(fields.url.as_deref())?),
        SourceKind::Upload => match fields.files.as_slice() {
            [file] => DraftContent::Upload(file.clone()),
            [] => return Err(ValidationError::new("file", "a file is required")),
            _ => return Err(ValidationError::new("file", "exactly one file is allowed")),
        },
        SourceKind::Text => {
            let content = fields.content.as_deref().unwrap_or_default();
            if content.trim().is_empty() {
                return Err(ValidationError::new("content", "content is required"));
            }
            DraftContent::Text(content.to_string())
        }
    };

    let title = fields
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(SourceDraft { title, content })
}

fn parse_link(raw: Option<&str>) -> Result<Url, ValidationError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(ValidationError::new("url", "a URL is required"));
    }
    let url = Url::parse(raw)
        .map_err(|e| ValidationError::new("url", format!("not an absolute URL: {e}")))?;
    if !url.has_host() {
        return Err(ValidationError::new("url", "URL must include a host"));
    }
    Ok(url)
}

/// Fields belonging to another kind make the input ambiguous.
fn reject_foreign_fields(kind: SourceKind, fields: &SourceFields) -> Result<(), ValidationError> {
    let has_url = fields.url.as_deref().is_some_and(|u| !u.trim().is_empty());
    let has_content = fields.content.as_deref().is_some_and(|c| !c.is_empty());
    let has_files = !fields.files.is_empty();

    let foreign = match kind {
        SourceKind::Link => [(has_content, "content"), (has_files, "file")],
        SourceKind::Upload => [(has_url, "url"), (has_content, "content")],
        SourceKind::Text => [(has_url, "url"), (has_files, "file")],
    };

    match foreign.into_iter().find(|(set, _)| *set) {
        Some((_, field)) => Err(ValidationError::new(
            field,
            format!("not allowed for {kind} sources"),
        )),
        None => Ok(()),
    }
}
