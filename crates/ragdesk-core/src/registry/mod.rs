//! Document registry abstraction.
//!
//! The [`DocumentRegistry`] trait covers every call the application makes
//! against the hosted retrieval service: listing, reading, uploading,
//! patching metadata, deleting and retrieval. The production backend is
//! the HTTP client in the `ragdesk` crate; [`memory::InMemoryRegistry`]
//! backs tests and `--offline` runs.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_documents`](DocumentRegistry::list_documents) | Every document, optionally filtered server-side |
//! | [`get_document`](DocumentRegistry::get_document) | One document by id |
//! | [`get_content`](DocumentRegistry::get_content) | Stored content of a document |
//! | [`upload_file`](DocumentRegistry::upload_file) | Upload one file with metadata |
//! | [`upload_raw`](DocumentRegistry::upload_raw) | Upload structured JSON content |
//! | [`patch_metadata`](DocumentRegistry::patch_metadata) | Merge metadata into a document |
//! | [`delete_document`](DocumentRegistry::delete_document) | Remove a document |
//! | [`retrieve`](DocumentRegistry::retrieve) | Relevance search over chunks |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;
use crate::models::{Document, Metadata, UploadRequest};

/// A chunk returned by [`DocumentRegistry::retrieve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    #[serde(default)]
    pub score: f64,
    pub document_id: String,
    #[serde(default)]
    pub document_name: String,
}

/// Remote document store. Implementations must be `Send + Sync`.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// All documents, following pagination to the end.
    ///
    /// `filter` is passed through to the registry's own filter language.
    async fn list_documents(&self, filter: Option<&Value>) -> Result<Vec<Document>, RegistryError>;

    async fn get_document(&self, id: &str) -> Result<Document, RegistryError>;

    async fn get_content(&self, id: &str) -> Result<Value, RegistryError>;

    async fn upload_file(&self, request: UploadRequest) -> Result<Document, RegistryError>;

    async fn upload_raw(
        &self,
        name: &str,
        data: Value,
        metadata: Metadata,
    ) -> Result<Document, RegistryError>;

    /// Merges `patch` into the document's metadata and returns the result.
    async fn patch_metadata(&self, id: &str, patch: &Metadata) -> Result<Document, RegistryError>;

    async fn delete_document(&self, id: &str) -> Result<(), RegistryError>;

    /// Top `top_k` chunks for `query`, best first.
    async fn retrieve(
        &self,
        query: &str,
        filter: Option<Value>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RegistryError>;
}

/// Equality-only subset of the registry filter language.
///
/// Accepts `{"key": "v"}`, `{"key": {"$eq": "v"}}` and
/// `{"key": {"$in": ["a", "b"]}}`. Other operators never match.
pub fn metadata_matches(metadata: &Metadata, filter: &Value) -> bool {
    let Some(obj) = filter.as_object() else {
        return true;
    };
    obj.iter().all(|(key, cond)| {
        let values = metadata.get(key).unwrap_or(&[]);
        match cond {
            Value::String(s) => values.iter().any(|v| v == s),
            Value::Object(ops) => ops.iter().all(|(op, arg)| match (op.as_str(), arg) {
                ("$eq", Value::String(s)) => values.iter().any(|v| v == s),
                ("$ne", Value::String(s)) => values.iter().all(|v| v != s),
                ("$in", Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| values.iter().any(|v| v == s)),
                _ => false,
            }),
            _ => false,
        }
    })
}
