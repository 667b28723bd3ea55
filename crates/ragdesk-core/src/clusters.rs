//! Metadata cluster definitions.
//!
//! A cluster names one metadata field that the UI groups filter options
//! under. Cluster definitions are static configuration; their values are
//! derived from the document collection at query time (see
//! [`crate::extract`]). A [`ClusterSet`] is constructed explicitly and
//! handed to whatever needs it.

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// A named, prioritized metadata field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCluster {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Presentation order; lower sorts first.
    #[serde(default)]
    pub priority: i32,
}

impl MetadataCluster {
    pub fn new(key: &str, label: &str, description: &str, priority: i32) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            priority,
        }
    }
}

/// The active cluster set, ordered by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSet {
    clusters: Vec<MetadataCluster>,
}

impl ClusterSet {
    /// Builds a set, rejecting empty or duplicate keys.
    ///
    /// Clusters are stably sorted by priority, so equal priorities keep
    /// their configured order.
    pub fn new(mut clusters: Vec<MetadataCluster>) -> Result<Self, ClusterError> {
        let mut seen = std::collections::HashSet::new();
        for c in &clusters {
            if c.key.trim().is_empty() {
                return Err(ClusterError::EmptyKey);
            }
            if !seen.insert(c.key.as_str()) {
                return Err(ClusterError::DuplicateKey(c.key.clone()));
            }
        }
        clusters.sort_by_key(|c| c.priority);
        Ok(Self { clusters })
    }

    /// The built-in cluster set used when no clusters are configured.
    pub fn builtin() -> Self {
        Self {
            clusters: vec![
                MetadataCluster::new("cliente", "Cliente", "Client that owns the document", 1),
                MetadataCluster::new("Ferramenta", "Ferramenta", "Tool the document belongs to", 2),
                MetadataCluster::new("tipo", "Tipo", "Kind of document", 3),
                MetadataCluster::new("scope", "Escopo", "Retrieval partition tag", 4),
            ],
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataCluster> {
        self.clusters.iter().find(|c| c.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(|c| c.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataCluster> {
        self.clusters.iter()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl Default for ClusterSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_priority_stable() {
        let set = ClusterSet::new(vec![
            MetadataCluster::new("b", "", "", 2),
            MetadataCluster::new("a", "", "", 1),
            MetadataCluster::new("c", "", "", 2),
        ])
        .unwrap();
        let keys: Vec<&str> = set.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = ClusterSet::new(vec![
            MetadataCluster::new("cliente", "", "", 1),
            MetadataCluster::new("cliente", "", "", 2),
        ])
        .unwrap_err();
        assert_eq!(err, ClusterError::DuplicateKey("cliente".to_string()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = ClusterSet::new(vec![MetadataCluster::new("  ", "", "", 1)]).unwrap_err();
        assert_eq!(err, ClusterError::EmptyKey);
    }

    #[test]
    fn test_builtin_contains_known_keys() {
        let set = ClusterSet::builtin();
        for key in ["cliente", "tipo", "Ferramenta", "scope"] {
            assert!(set.get(key).is_some(), "missing {}", key);
        }
    }
}
