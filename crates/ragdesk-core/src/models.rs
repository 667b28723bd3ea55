//! Core data models used throughout ragdesk.
//!
//! Registry metadata arrives with inconsistent shapes: the same key can
//! hold a single string on one document and a list of strings on another.
//! [`Metadata`] absorbs both at deserialization time and only ever hands
//! out `&[String]` views, so evaluators never branch on the shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single metadata value as stored by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Scalar(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// Converts a raw JSON value, returning `None` for anything that is
    /// neither a string nor an array. Non-string array items are dropped.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(MetadataValue::Scalar(s.clone())),
            Value::Array(items) => Some(MetadataValue::List(
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
            )),
            _ => None,
        }
    }

    /// Every value as a slice; a scalar is a one-element slice.
    pub fn as_slice(&self) -> &[String] {
        match self {
            MetadataValue::Scalar(s) => std::slice::from_ref(s),
            MetadataValue::List(items) => items,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Scalar(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Scalar(s)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(items: Vec<String>) -> Self {
        MetadataValue::List(items)
    }
}

/// Document metadata keyed by field name.
///
/// Deserializes from any JSON object; entries that are not strings or
/// arrays are silently skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, MetadataValue>"
)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds metadata from a JSON value; non-objects yield empty metadata.
    pub fn from_json(value: &Value) -> Self {
        match value.as_object() {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| MetadataValue::from_json(v).map(|mv| (k.clone(), mv)))
                .collect(),
            None => Self::default(),
        }
    }

    /// All values recorded for `key`, or `None` when the key is absent.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(MetadataValue::as_slice)
    }

    /// The first value recorded for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Overwrites entries with those from `patch`; keys not in the patch stay.
    pub fn merge(&mut self, patch: &Metadata) {
        for (k, v) in &patch.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object form, as sent to the registry.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or(Value::Object(Default::default()))
    }
}

impl From<BTreeMap<String, Value>> for Metadata {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        raw.iter()
            .filter_map(|(k, v)| MetadataValue::from_json(v).map(|mv| (k.clone(), mv)))
            .collect()
    }
}

impl From<Metadata> for BTreeMap<String, MetadataValue> {
    fn from(m: Metadata) -> Self {
        m.0
    }
}

impl FromIterator<(String, MetadataValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        Metadata(iter.into_iter().collect())
    }
}

/// A document held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chunk_count: Option<u64>,
}

impl Document {
    /// Minimal document, mostly useful for tests and the in-memory registry.
    pub fn new(id: impl Into<String>, name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metadata,
            created_at: None,
            updated_at: None,
            status: None,
            chunk_count: None,
        }
    }
}

/// One file upload destined for the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_and_list_values_normalize() {
        let m: Metadata = serde_json::from_value(json!({
            "cliente": "Acme",
            "scope": ["a", "b"],
        }))
        .unwrap();
        assert_eq!(m.get("cliente").unwrap(), ["Acme".to_string()]);
        assert_eq!(m.get("scope").unwrap().len(), 2);
        assert_eq!(m.first("scope"), Some("a"));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let m: Metadata = serde_json::from_value(json!({
            "count": 3,
            "flag": true,
            "nothing": null,
            "mixed": ["x", 1, "y"],
            "ok": "yes",
        }))
        .unwrap();
        assert!(m.get("count").is_none());
        assert!(m.get("flag").is_none());
        assert!(m.get("nothing").is_none());
        assert_eq!(m.get("mixed").unwrap(), ["x".to_string(), "y".to_string()]);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_serialize_preserves_shape() {
        let m = Metadata::new()
            .with("cliente", "Acme")
            .with("scope", vec!["a".to_string()]);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, json!({"cliente": "Acme", "scope": ["a"]}));
    }

    #[test]
    fn test_merge_overwrites_only_patched_keys() {
        let mut m = Metadata::new().with("cliente", "Acme").with("tipo", "manual");
        m.merge(&Metadata::new().with("tipo", "filtro"));
        assert_eq!(m.first("cliente"), Some("Acme"));
        assert_eq!(m.first("tipo"), Some("filtro"));
    }

    #[test]
    fn test_document_defaults() {
        let d: Document = serde_json::from_value(json!({"id": "d1"})).unwrap();
        assert_eq!(d.name, "");
        assert!(d.metadata.is_empty());
        assert!(d.created_at.is_none());
    }
}
