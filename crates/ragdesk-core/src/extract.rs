//! Metadata value extraction.
//!
//! Scans a document collection and produces, per metadata key, the
//! distinct values observed, deduplicated and lexicographically sorted.
//! Pure functions; malformed metadata was already dropped when the
//! documents were deserialized, and empty strings are never reported.

use std::collections::{BTreeMap, BTreeSet};

use crate::clusters::ClusterSet;
use crate::models::Document;

/// Metadata key → sorted distinct values.
pub type ValueIndex = BTreeMap<String, Vec<String>>;

/// Keys excluded from [`extract_all_values`].
pub const DENYLIST: &[&str] = &[
    "cliente",
    "document_id",
    "document_uploaded_at",
    "document_name",
];

/// Keys always present in [`extract_all_values`] output, even when no
/// document carries them.
pub const DEFAULT_KEYS: &[&str] = &["document_type", "document_source"];

/// Values for every cluster key in `clusters`.
///
/// Every cluster key appears in the output, with an empty list when no
/// document carries it.
pub fn extract_values(documents: &[Document], clusters: &ClusterSet) -> ValueIndex {
    let mut index: BTreeMap<String, BTreeSet<String>> = clusters
        .keys()
        .map(|k| (k.to_string(), BTreeSet::new()))
        .collect();

    for doc in documents {
        for (key, values) in index.iter_mut() {
            if let Some(found) = doc.metadata.get(key) {
                collect_into(values, found);
            }
        }
    }

    finish(index)
}

/// Values for every key seen on any document, minus [`DENYLIST`].
///
/// `default_keys` are seeded first so consumers can render empty
/// sections for them.
pub fn extract_all_values<S: AsRef<str>>(documents: &[Document], default_keys: &[S]) -> ValueIndex {
    let mut index: BTreeMap<String, BTreeSet<String>> = default_keys
        .iter()
        .map(|k| (k.as_ref().to_string(), BTreeSet::new()))
        .collect();

    for doc in documents {
        for (key, values) in doc.metadata.iter() {
            if DENYLIST.contains(&key) {
                continue;
            }
            let entry = index.entry(key.to_string()).or_default();
            collect_into(entry, values);
        }
    }

    finish(index)
}

/// Sorted distinct values of a single key.
pub fn distinct_values(documents: &[Document], key: &str) -> Vec<String> {
    let mut set = BTreeSet::new();
    for doc in documents {
        if let Some(found) = doc.metadata.get(key) {
            collect_into(&mut set, found);
        }
    }
    set.into_iter().collect()
}

fn collect_into(set: &mut BTreeSet<String>, values: &[String]) {
    for v in values {
        if !v.is_empty() {
            set.insert(v.clone());
        }
    }
}

fn finish(index: BTreeMap<String, BTreeSet<String>>) -> ValueIndex {
    index
        .into_iter()
        .map(|(k, set)| (k, set.into_iter().collect()))
        .collect()
}
