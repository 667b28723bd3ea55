//! HTTP client for the Ragie document registry.
//!
//! Implements [`DocumentRegistry`] over the Ragie REST API with a bearer
//! token read from `RAGIE_API_KEY`.
//!
//! # Retry Strategy
//!
//! A request that times out is retried exactly once. Every other failure
//! (connection errors, non-2xx statuses) is returned immediately and
//! mapped to a [`RegistryError`]:
//!
//! | Status | Error |
//! |--------|-------|
//! | 404 | [`RegistryError::NotFound`] |
//! | 401, 403 | [`RegistryError::Unauthorized`] |
//! | other non-2xx | [`RegistryError::Upstream`] |

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use ragdesk_core::models::UploadRequest;
use ragdesk_core::registry::{DocumentRegistry, RetrievedChunk};
use ragdesk_core::validate::{check_api_key, ApiKeyKind};
use ragdesk_core::{Document, Metadata, RegistryError};

use crate::config::RegistryConfig;

pub const API_KEY_ENV: &str = "RAGIE_API_KEY";

/// Ragie REST client.
pub struct RagieClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    page_size: usize,
    partition: Option<String>,
}

#[derive(Deserialize)]
struct DocumentPage {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    scored_chunks: Vec<RetrievedChunk>,
}

impl RagieClient {
    /// Builds a client with an explicit key. The key is validated first.
    pub fn new(config: &RegistryConfig, api_key: &str) -> Result<Self> {
        check_api_key(ApiKeyKind::Ragie, api_key)?;
        let base = Url::parse(config.base_url.trim())
            .with_context(|| format!("Invalid registry base_url: {}", config.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Invalid registry base_url: {}", config.base_url);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            api_key: api_key.trim().to_string(),
            page_size: config.page_size,
            partition: config.partition.clone(),
        })
    }

    /// Builds a client with the key from `RAGIE_API_KEY`.
    pub fn from_env(config: &RegistryConfig) -> Result<Self> {
        let key = std::env::var(API_KEY_ENV).unwrap_or_default();
        Self::new(config, &key).with_context(|| format!("Invalid or missing {}", API_KEY_ENV))
    }

    /// Base URL extended with `segments`, each percent-encoded as a
    /// single path segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments.iter().copied());
        }
        url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.bearer_auth(&self.api_key);
        match &self.partition {
            Some(p) => req.header("partition", p),
            None => req,
        }
    }

    /// Sends the request built by `build`, retrying once on timeout.
    async fn send<F>(&self, what: &str, build: F) -> Result<Response, RegistryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retried = false;
        loop {
            match self.authorize(build()).send().await {
                Ok(resp) => return check_status(resp).await,
                Err(e) if e.is_timeout() && !retried => {
                    tracing::warn!(request = what, "registry request timed out, retrying once");
                    retried = true;
                }
                Err(e) if e.is_timeout() => return Err(RegistryError::Timeout(what.to_string())),
                Err(e) => return Err(RegistryError::Transport(e.to_string())),
            }
        }
    }

    async fn send_json<T, F>(&self, what: &str, build: F) -> Result<T, RegistryError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let resp = self.send(what, build).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))
    }
}

async fn check_status(resp: Response) -> Result<Response, RegistryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::Unauthorized(message),
        s => RegistryError::Upstream {
            status: s.as_u16(),
            message,
        },
    })
}

/// Pulls `detail` or `message` out of a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .find_map(|k| value.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
}

#[async_trait]
impl DocumentRegistry for RagieClient {
    async fn list_documents(&self, filter: Option<&Value>) -> Result<Vec<Document>, RegistryError> {
        let filter = filter.map(Value::to_string);
        let mut cursor: Option<String> = None;
        let mut documents = Vec::new();

        loop {
            let mut query: Vec<(&str, String)> = vec![("page_size", self.page_size.to_string())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            if let Some(f) = &filter {
                query.push(("filter", f.clone()));
            }

            let page: DocumentPage = self
                .send_json("list documents", || {
                    self.http.get(self.url(&["documents"])).query(&query)
                })
                .await?;
            documents.extend(page.documents);

            cursor = page.pagination.and_then(|p| p.next_cursor).filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(count = documents.len(), "listed registry documents");
        Ok(documents)
    }

    async fn get_document(&self, id: &str) -> Result<Document, RegistryError> {
        let url = self.url(&["documents", id]);
        self.send_json("get document", || self.http.get(url.clone())).await
    }

    async fn get_content(&self, id: &str) -> Result<Value, RegistryError> {
        let url = self.url(&["documents", id, "content"]);
        self.send_json("get content", || self.http.get(url.clone())).await
    }

    async fn upload_file(&self, request: UploadRequest) -> Result<Document, RegistryError> {
        let url = self.url(&["documents"]);
        let metadata = request.metadata.to_json().to_string();
        let build = || {
            let part = Part::bytes(request.data.clone()).file_name(request.name.clone());
            let part = match part.mime_str(&request.content_type) {
                Ok(p) => p,
                Err(_) => Part::bytes(request.data.clone()).file_name(request.name.clone()),
            };
            let form = Form::new()
                .part("file", part)
                .text("metadata", metadata.clone())
                .text("mode", "fast");
            self.http.post(url.clone()).multipart(form)
        };
        let doc: Document = self.send_json("upload file", build).await?;
        tracing::info!(name = %request.name, id = %doc.id, "uploaded file");
        Ok(doc)
    }

    async fn upload_raw(
        &self,
        name: &str,
        data: Value,
        metadata: Metadata,
    ) -> Result<Document, RegistryError> {
        let url = self.url(&["documents", "raw"]);
        let body = json!({
            "name": name,
            "data": data,
            "metadata": metadata.to_json(),
        });
        let doc: Document = self
            .send_json("upload raw", || self.http.post(url.clone()).json(&body))
            .await?;
        tracing::info!(name, id = %doc.id, "uploaded raw document");
        Ok(doc)
    }

    async fn patch_metadata(&self, id: &str, patch: &Metadata) -> Result<Document, RegistryError> {
        let url = self.url(&["documents", id, "metadata"]);
        let body = json!({ "metadata": patch.to_json() });
        self.send("patch metadata", || self.http.patch(url.clone()).json(&body))
            .await?;
        self.get_document(id).await
    }

    async fn delete_document(&self, id: &str) -> Result<(), RegistryError> {
        let url = self.url(&["documents", id]);
        self.send("delete document", || self.http.delete(url.clone())).await?;
        tracing::info!(id, "deleted document");
        Ok(())
    }

    async fn retrieve(
        &self,
        query: &str,
        filter: Option<Value>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RegistryError> {
        let url = self.url(&["retrievals"]);
        let mut body = json!({
            "query": query,
            "top_k": top_k,
            "rerank": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        let resp: RetrievalResponse = self
            .send_json("retrieve", || self.http.post(url.clone()).json(&body))
            .await?;
        Ok(resp.scored_chunks)
    }
}
