//! In-memory [`DocumentRegistry`] for tests and offline runs.
//!
//! Documents live in a `BTreeMap` behind `std::sync::RwLock`. Ids are
//! sequential and zero-padded (`doc-000001`, `doc-000002`, ...) so
//! listing order is upload order. Retrieval is naive keyword overlap
//! over stored content.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{metadata_matches, DocumentRegistry, RetrievedChunk};
use crate::error::RegistryError;
use crate::models::{Document, Metadata, UploadRequest};

struct StoredDoc {
    doc: Document,
    content: Value,
}

/// In-memory registry.
pub struct InMemoryRegistry {
    docs: RwLock<BTreeMap<String, StoredDoc>>,
    next_id: AtomicU64,
    fail_names: RwLock<Vec<String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            fail_names: RwLock::new(Vec::new()),
        }
    }

    /// Registry pre-populated with `documents` (content is empty).
    pub fn with_documents(documents: Vec<Document>) -> Self {
        let registry = Self::new();
        {
            let mut docs = registry.write();
            for doc in documents {
                docs.insert(
                    doc.id.clone(),
                    StoredDoc {
                        doc,
                        content: Value::Null,
                    },
                );
            }
        }
        registry
    }

    /// Makes later uploads of a document named `name` fail with a 500.
    pub fn fail_uploads_named(&self, name: &str) {
        self.fail_names
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredDoc>> {
        self.docs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredDoc>> {
        self.docs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, name: &str, metadata: Metadata, content: Value) -> Result<Document, RegistryError> {
        let failing = self
            .fail_names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|n| n == name);
        if failing {
            return Err(RegistryError::Upstream {
                status: 500,
                message: format!("upload of {} rejected", name),
            });
        }

        let id = format!("doc-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let mut doc = Document::new(id.clone(), name, metadata);
        doc.created_at = Some(now);
        doc.updated_at = Some(now);
        doc.status = Some("ready".to_string());
        doc.chunk_count = Some(1);

        self.write().insert(
            id,
            StoredDoc {
                doc: doc.clone(),
                content,
            },
        );
        Ok(doc)
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn list_documents(&self, filter: Option<&Value>) -> Result<Vec<Document>, RegistryError> {
        Ok(self
            .read()
            .values()
            .filter(|s| filter.map_or(true, |f| metadata_matches(&s.doc.metadata, f)))
            .map(|s| s.doc.clone())
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Document, RegistryError> {
        self.read()
            .get(id)
            .map(|s| s.doc.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn get_content(&self, id: &str) -> Result<Value, RegistryError> {
        self.read()
            .get(id)
            .map(|s| s.content.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn upload_file(&self, request: UploadRequest) -> Result<Document, RegistryError> {
        let content = match String::from_utf8(request.data) {
            Ok(text) => Value::String(text),
            Err(e) => Value::String(format!("<{} bytes>", e.as_bytes().len())),
        };
        self.insert(&request.name, request.metadata, content)
    }

    async fn upload_raw(
        &self,
        name: &str,
        data: Value,
        metadata: Metadata,
    ) -> Result<Document, RegistryError> {
        self.insert(name, metadata, data)
    }

    async fn patch_metadata(&self, id: &str, patch: &Metadata) -> Result<Document, RegistryError> {
        let mut docs = self.write();
        let stored = docs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        stored.doc.metadata.merge(patch);
        stored.doc.updated_at = Some(Utc::now());
        Ok(stored.doc.clone())
    }

    async fn delete_document(&self, id: &str) -> Result<(), RegistryError> {
        self.write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn retrieve(
        &self,
        query: &str,
        filter: Option<Value>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RegistryError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<RetrievedChunk> = self
            .read()
            .values()
            .filter(|s| filter.as_ref().map_or(true, |f| metadata_matches(&s.doc.metadata, f)))
            .filter_map(|s| {
                let text = content_text(&s.content);
                let haystack = format!("{} {}", s.doc.name, text).to_lowercase();
                let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if found == 0 {
                    return None;
                }
                Some(RetrievedChunk {
                    text,
                    score: found as f64 / terms.len() as f64,
                    document_id: s.doc.id.clone(),
                    document_name: s.doc.name.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upload_get_delete() {
        let reg = InMemoryRegistry::new();
        let doc = reg
            .upload_raw("a.json", json!({"x": 1}), Metadata::new().with("cliente", "Acme"))
            .await
            .unwrap();
        assert_eq!(doc.id, "doc-000001");
        assert_eq!(doc.status.as_deref(), Some("ready"));
        assert_eq!(reg.get_content("doc-000001").await.unwrap(), json!({"x": 1}));

        reg.delete_document("doc-000001").await.unwrap();
        assert_eq!(
            reg.get_document("doc-000001").await.unwrap_err(),
            RegistryError::NotFound("doc-000001".to_string())
        );
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_upload_order_past_nine() {
        let reg = InMemoryRegistry::new();
        for i in 1..=12 {
            reg.upload_raw(&format!("{}.json", i), json!({}), Metadata::new())
                .await
                .unwrap();
        }
        let names: Vec<String> = reg
            .list_documents(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("{}.json", i)).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let reg = InMemoryRegistry::with_documents(vec![
            Document::new("1", "a", Metadata::new().with("cliente", "Acme")),
            Document::new("2", "b", Metadata::new().with("cliente", "Beta")),
        ]);
        let all = reg.list_documents(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let acme = reg
            .list_documents(Some(&json!({"cliente": "Acme"})))
            .await
            .unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].id, "1");
    }

    #[tokio::test]
    async fn test_patch_merges() {
        let reg = InMemoryRegistry::with_documents(vec![Document::new(
            "1",
            "a",
            Metadata::new().with("cliente", "Acme").with("tipo", "manual"),
        )]);
        let doc = reg
            .patch_metadata("1", &Metadata::new().with("tipo", "faq"))
            .await
            .unwrap();
        assert_eq!(doc.metadata.first("cliente"), Some("Acme"));
        assert_eq!(doc.metadata.first("tipo"), Some("faq"));
        assert!(reg.patch_metadata("9", &Metadata::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let reg = InMemoryRegistry::new();
        reg.fail_uploads_named("bad.pdf");
        let req = UploadRequest {
            name: "bad.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            data: vec![1, 2],
            metadata: Metadata::new(),
        };
        assert!(matches!(
            reg.upload_file(req).await,
            Err(RegistryError::Upstream { status: 500, .. })
        ));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_overlap() {
        let reg = InMemoryRegistry::new();
        reg.upload_raw("metas.json", json!({"texto": "metas de vendas"}), Metadata::new().with("scope", "vendas"))
            .await
            .unwrap();
        reg.upload_raw("rh.json", json!({"texto": "ferias"}), Metadata::new().with("scope", "rh"))
            .await
            .unwrap();

        let hits = reg.retrieve("metas vendas", None, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_name, "metas.json");

        let scoped = reg
            .retrieve("ferias", Some(json!({"scope": "vendas"})), 5)
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }
}
