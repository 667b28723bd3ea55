//! Document listing commands for the CLI.
//!
//! `rdk docs list`, `rdk docs delete`, `rdk metadata`, `rdk clusters`,
//! `rdk clientes` and `rdk validate`. Output goes to stdout.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use ragdesk_core::clusters::ClusterSet;
use ragdesk_core::extract::{distinct_values, extract_all_values, extract_values, ValueIndex};
use ragdesk_core::filter::{filter_by_values, filter_documents, FilterGroup, FilterRule};
use ragdesk_core::registry::DocumentRegistry;
use ragdesk_core::validate::validate_content;
use ragdesk_core::Document;

use crate::config::Config;

/// Selection for `rdk docs list`.
#[derive(Debug, Default)]
pub struct ListOptions {
    /// `key=value` substring filters, ANDed.
    pub values: Vec<(String, String)>,
    /// `campo:operador[:valor]` rules.
    pub rules: Vec<String>,
    /// Combine rules with OR instead of AND.
    pub any: bool,
}

/// Applies `options` to `docs`.
pub fn select(docs: &[Document], options: &ListOptions) -> Result<Vec<Document>> {
    let values: BTreeMap<String, String> = options.values.iter().cloned().collect();
    let mut selected = filter_by_values(docs, &values);

    if !options.rules.is_empty() {
        let rules = options
            .rules
            .iter()
            .map(|r| {
                FilterRule::parse_compact(r)
                    .with_context(|| format!("invalid rule '{}': expected campo:operador[:valor]", r))
            })
            .collect::<Result<Vec<_>>>()?;
        let group = if options.any {
            FilterGroup::any(rules)
        } else {
            FilterGroup::all(rules)
        };
        selected = filter_documents(&selected, std::slice::from_ref(&group));
    }
    Ok(selected)
}

pub async fn run_list(registry: &dyn DocumentRegistry, options: &ListOptions) -> Result<()> {
    let docs = registry.list_documents(None).await?;
    let selected = select(&docs, options)?;

    if selected.is_empty() {
        println!("No documents found.");
        return Ok(());
    }
    for d in &selected {
        let meta: Vec<String> = d
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.join("|")))
            .collect();
        println!("{}  {}  {}", d.id, d.name, meta.join(", "));
    }
    println!();
    println!("{} of {} documents", selected.len(), docs.len());
    Ok(())
}

pub async fn run_delete(registry: &dyn DocumentRegistry, id: &str) -> Result<()> {
    registry.delete_document(id).await?;
    println!("Deleted {}", id);
    Ok(())
}

/// `rdk metadata`: cluster keys by default, every key with `--all`.
pub async fn run_metadata(
    registry: &dyn DocumentRegistry,
    config: &Config,
    all: bool,
) -> Result<()> {
    let docs = registry.list_documents(None).await?;
    let index = if all {
        extract_all_values(&docs, &config.metadata.default_keys)
    } else {
        extract_values(&docs, &config.metadata.cluster_set()?)
    };
    print_index(&index);
    Ok(())
}

fn print_index(index: &ValueIndex) {
    for (key, values) in index {
        if values.is_empty() {
            println!("{}: (none)", key);
        } else {
            println!("{}: {}", key, values.join(", "));
        }
    }
}

/// `rdk clusters`: the configured clusters in priority order.
pub fn run_clusters(clusters: &ClusterSet) {
    println!("{:<4} {:<14} {:<14} DESCRIPTION", "PRI", "KEY", "LABEL");
    for c in clusters.iter() {
        println!(
            "{:<4} {:<14} {:<14} {}",
            c.priority, c.key, c.label, c.description
        );
    }
}

pub async fn run_clientes(registry: &dyn DocumentRegistry) -> Result<()> {
    let docs = registry.list_documents(None).await?;
    let clientes = distinct_values(&docs, "cliente");
    if clientes.is_empty() {
        println!("No clients found.");
    }
    for c in clientes {
        println!("{}", c);
    }
    Ok(())
}

/// `rdk validate <file>`: exits non-zero on invalid content.
pub fn run_validate(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match validate_content(&text) {
        Ok(check) => {
            println!("valid: suggested name \"{}\"", check.suggested_name);
            Ok(())
        }
        Err(e) => bail!("{}: {}", path.display(), e),
    }
}
