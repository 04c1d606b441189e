//! HTTP implementation of [`NotebookApi`] over the notebook service REST API.
//!
//! One [`HttpNotebookApi`] wraps a pooled `reqwest::Client`. Request timeouts
//! are configured here; the core treats a timeout like any other failure.

mod wire;

use std::collections::BTreeSet;

use reqwest::multipart::{Form, Part};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use sourceflow_shared::{
    ApiConfig, ApiError, ApiResult, ConnectionStatus, CreateOptions, DownloadedFile, DraftContent,
    EmbedAck, EmbedKind, Insight, NewNote, Note, NoteUpdate, NotebookApi, NotebookUpdate, Result,
    Settings, Source, SourceDraft, SourceflowError, Transformation,
};

use crate::wire::{
    ConfigBody, CreateInsightBody, EmbedRequestBody, EmbedResponseBody, ErrorBody, InsightBody,
    NoteBody, SettingsBody, SourceBody, TransformationBody, UpdateSourceBody,
    attachment_file_name,
};

/// REST client for the notebook service.
#[derive(Debug, Clone)]
pub struct HttpNotebookApi {
    client: Client,
    base_url: Url,
}

impl HttpNotebookApi {
    /// Build a client from the `[api]` config section.
    pub fn new(base_url: Url, config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|e| SourceflowError::config(format!("http client build: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// `<base>/<segments...>`, with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::Network(format!("base URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> ApiResult<RequestBuilder> {
        Ok(self.client.request(method, self.endpoint(segments)?))
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        let url = response.url().to_string();
        debug!(%url, status = status.as_u16(), "notebook service responded");

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message())
            .unwrap_or(body);
        Err(ApiError::Status {
            code: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn draft_form(draft: &SourceDraft, options: CreateOptions) -> ApiResult<Form> {
        let mut form = Form::new()
            .text("type", draft.kind().as_str())
            .text("embed", "false")
            .text("async_processing", options.async_processing.to_string());

        if let Some(title) = &draft.title {
            form = form.text("title", title.clone());
        }

        form = match &draft.content {
            DraftContent::Link(url) => form.text("url", url.to_string()),
            DraftContent::Text(content) => form.text("content", content.clone()),
            DraftContent::Upload(file) => {
                let bytes = tokio::fs::read(file.path())
                    .await
                    .map_err(|e| ApiError::File {
                        path: file.path().to_path_buf(),
                        message: e.to_string(),
                    })?;
                form.part("file", Part::bytes(bytes).file_name(file.file_name()))
            }
        };

        Ok(form)
    }
}

fn map_transport(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

impl NotebookApi for HttpNotebookApi {
    #[instrument(skip_all, fields(kind = %draft.kind()))]
    async fn create_source(
        &self,
        draft: &SourceDraft,
        options: CreateOptions,
    ) -> ApiResult<Source> {
        let form = Self::draft_form(draft, options).await?;
        let request = self.request(Method::POST, &["api", "sources"])?.multipart(form);
        let body: SourceBody = self.send_json(request).await?;
        body.into_domain()
    }

    #[instrument(skip(self, notebook_ids), fields(count = notebook_ids.len()))]
    async fn associate_notebooks(
        &self,
        source_id: &str,
        notebook_ids: &BTreeSet<String>,
    ) -> ApiResult<()> {
        for notebook_id in notebook_ids {
            let request = self.request(
                Method::POST,
                &["api", "notebooks", notebook_id, "sources", source_id],
            )?;
            self.send(request).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_insight(&self, source_id: &str, transformation_id: &str) -> ApiResult<Insight> {
        let request = self
            .request(Method::POST, &["api", "sources", source_id, "insights"])?
            .json(&CreateInsightBody { transformation_id });
        let body: InsightBody = self.send_json(request).await?;
        Ok(body.into_domain(source_id, Some(transformation_id)))
    }

    #[instrument(skip(self))]
    async fn embed_content(&self, item_id: &str, kind: EmbedKind) -> ApiResult<EmbedAck> {
        let request = self.request(Method::POST, &["api", "embed"])?.json(&EmbedRequestBody {
            item_id,
            item_type: kind.as_str(),
        });
        let body: EmbedResponseBody = self.send_json(request).await?;
        body.into_domain()
    }

    async fn get_source(&self, source_id: &str) -> ApiResult<Source> {
        let request = self.request(Method::GET, &["api", "sources", source_id])?;
        let body: SourceBody = self.send_json(request).await?;
        body.into_domain()
    }

    async fn list_insights(&self, source_id: &str) -> ApiResult<Vec<Insight>> {
        let request = self.request(Method::GET, &["api", "sources", source_id, "insights"])?;
        let bodies: Vec<InsightBody> = self.send_json(request).await?;
        Ok(bodies
            .into_iter()
            .map(|b| b.into_domain(source_id, None))
            .collect())
    }

    async fn list_transformations(&self) -> ApiResult<Vec<Transformation>> {
        let request = self.request(Method::GET, &["api", "transformations"])?;
        let bodies: Vec<TransformationBody> = self.send_json(request).await?;
        Ok(bodies.into_iter().map(Transformation::from).collect())
    }

    async fn get_settings(&self) -> ApiResult<Settings> {
        let request = self.request(Method::GET, &["api", "settings"])?;
        let body: SettingsBody = self.send_json(request).await?;
        Ok(body.into())
    }

    #[instrument(skip(self))]
    async fn delete_source(&self, source_id: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, &["api", "sources", source_id])?;
        self.send(request).await.map(|_| ())
    }

    async fn update_source_title(&self, source_id: &str, title: &str) -> ApiResult<()> {
        let request = self
            .request(Method::PUT, &["api", "sources", source_id])?
            .json(&UpdateSourceBody { title });
        self.send(request).await.map(|_| ())
    }

    async fn create_note(&self, note: &NewNote) -> ApiResult<Note> {
        let request = self.request(Method::POST, &["api", "notes"])?.json(note);
        let body: NoteBody = self.send_json(request).await?;
        Ok(body.into())
    }

    async fn update_note(&self, note_id: &str, update: &NoteUpdate) -> ApiResult<Note> {
        let request = self
            .request(Method::PUT, &["api", "notes", note_id])?
            .json(update);
        let body: NoteBody = self.send_json(request).await?;
        Ok(body.into())
    }

    async fn delete_note(&self, note_id: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, &["api", "notes", note_id])?;
        self.send(request).await.map(|_| ())
    }

    async fn update_notebook(&self, notebook_id: &str, update: &NotebookUpdate) -> ApiResult<()> {
        let request = self
            .request(Method::PUT, &["api", "notebooks", notebook_id])?
            .json(update);
        self.send(request).await.map(|_| ())
    }

    async fn delete_notebook(&self, notebook_id: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, &["api", "notebooks", notebook_id])?;
        self.send(request).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn download_file(&self, source_id: &str) -> ApiResult<DownloadedFile> {
        let request = self.request(Method::GET, &["api", "sources", source_id, "download"])?;
        let response = self.send(request).await?;
        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_file_name);
        let bytes = response.bytes().await.map_err(map_transport)?;
        Ok(DownloadedFile {
            file_name,
            bytes: bytes.to_vec(),
        })
    }

    async fn check_connection(&self) -> ApiResult<ConnectionStatus> {
        let request = self.request(Method::GET, &["api", "config"])?;
        let body: ConfigBody = self.send_json(request).await?;
        Ok(body.into())
    }
}
