//! Saved filter sets.
//!
//! A [`FilterSet`] is a named list of [`FilterGroup`]s belonging to one
//! client. The store keeps them in memory and, when `[filters].path` is
//! configured, rewrites that file as pretty JSON after every mutation.
//! There is no locking across processes; the last writer wins.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ragdesk_core::filter::FilterGroup;
use ragdesk_core::validate::require;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    pub id: String,
    pub cliente: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<FilterGroup>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFilterSet {
    pub cliente: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<FilterGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSetPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<FilterGroup>>,
}

pub struct FilterStore {
    sets: RwLock<Vec<FilterSet>>,
    path: Option<PathBuf>,
}

impl FilterStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            sets: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Loads `path` when it exists; mutations are written back to it.
    pub fn open(path: &Path) -> Result<Self> {
        let sets = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read filters file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse filters file: {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            sets: RwLock::new(sets),
            path: Some(path.to_path_buf()),
        })
    }

    /// Filter sets ordered by creation, optionally only those of `cliente`.
    pub fn list(&self, cliente: Option<&str>) -> Vec<FilterSet> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.iter()
            .filter(|s| cliente.map_or(true, |c| s.cliente.eq_ignore_ascii_case(c.trim())))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<FilterSet> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.iter().find(|s| s.id == id).cloned()
    }

    pub fn create(&self, new: NewFilterSet) -> Result<FilterSet> {
        let cliente = require("cliente", &new.cliente)?.to_string();
        let name = require("name", &new.name)?.to_string();
        let now = Utc::now();
        let set = FilterSet {
            id: uuid::Uuid::new_v4().to_string(),
            cliente,
            name,
            groups: new.groups,
            created_at: now,
            updated_at: now,
        };

        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        let mut next = sets.clone();
        next.push(set.clone());
        self.persist(&next)?;
        *sets = next;
        tracing::info!(id = %set.id, cliente = %set.cliente, "filter set created");
        Ok(set)
    }

    /// Applies `patch`; `Ok(None)` when `id` does not exist.
    pub fn patch(&self, id: &str, patch: FilterSetPatch) -> Result<Option<FilterSet>> {
        let name = match &patch.name {
            Some(n) => Some(require("name", n)?.to_string()),
            None => None,
        };

        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        let Some(pos) = sets.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        let mut updated = sets[pos].clone();
        if let Some(n) = name {
            updated.name = n;
        }
        if let Some(g) = patch.groups {
            updated.groups = g;
        }
        updated.updated_at = Utc::now();

        let mut next = sets.clone();
        next[pos] = updated.clone();
        self.persist(&next)?;
        *sets = next;
        Ok(Some(updated))
    }

    /// Removes a filter set; `false` when it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        if !sets.iter().any(|s| s.id == id) {
            return Ok(false);
        }
        let next: Vec<FilterSet> = sets.iter().filter(|s| s.id != id).cloned().collect();
        self.persist(&next)?;
        *sets = next;
        Ok(true)
    }

    /// Writes `sets` to a sibling temp file and renames it over the target.
    /// Memory is only updated by callers after this succeeds.
    fn persist(&self, sets: &[FilterSet]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(sets)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write filters file: {}", tmp.display()))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e)
                .with_context(|| format!("Failed to replace filters file: {}", path.display()));
        }
        Ok(())
    }
}
