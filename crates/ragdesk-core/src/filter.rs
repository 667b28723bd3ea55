//! Filter and rule evaluation over document metadata.
//!
//! Two evaluator shapes are supported:
//!
//! 1. **Value filters** ([`filter_by_values`]): a map from metadata key to
//!    a desired value. A document matches when, for every non-empty entry,
//!    one of its values for that key contains the desired value
//!    (case-insensitive substring). Entries are ANDed.
//! 2. **Rule filters** ([`filter_documents`], [`test_rules`]): explicit
//!    key/operator/value rules grouped into [`FilterGroup`]s. Rules inside a
//!    group combine with the group's `AND`/`OR`; groups are always ANDed.
//!
//! # Missing fields
//!
//! A field is *absent* when the key is missing or every value is the empty
//! string. How absence is treated depends on [`MissingField`]:
//!
//! | Policy | `is_empty` on absent field | any other operator |
//! |--------|----------------------------|--------------------|
//! | [`MissingField::AllowEmpty`] | `true` | `false` |
//! | [`MissingField::Reject`] | `false` | `false` |
//!
//! Filter groups use `AllowEmpty`; the rule editor's test run
//! ([`test_rules`]) uses `Reject`.
//!
//! # List values
//!
//! Positive operators (`contains`, `equals`, `starts_with`, `ends_with`)
//! match when any value matches. `not_equals` holds when no value equals.
//! `is_empty` holds when every present value is blank after trimming.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Document, Metadata};

/// Comparison operator of a [`FilterRule`].
///
/// Parsing canonicalizes the spellings found across clients
/// (`startsWith`, `not-equals`, `contem`, `!=`, ...). Unrecognized names are
/// kept as [`FilterOperator::Unknown`] and never match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Contains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    Unknown(String),
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Self {
        let norm = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "contains" | "contem" | "contém" | "includes" | "like" => FilterOperator::Contains,
            "equals" | "eq" | "=" | "==" | "igual" | "is" => FilterOperator::Equals,
            "not_equals" | "notequals" | "ne" | "neq" | "!=" | "diferente" => {
                FilterOperator::NotEquals
            }
            "starts_with" | "startswith" | "comeca_com" | "começa_com" => {
                FilterOperator::StartsWith
            }
            "ends_with" | "endswith" | "termina_com" => FilterOperator::EndsWith,
            "is_empty" | "isempty" | "empty" | "vazio" => FilterOperator::IsEmpty,
            "is_not_empty" | "isnotempty" | "not_empty" | "nao_vazio" | "não_vazio" => {
                FilterOperator::IsNotEmpty
            }
            _ => FilterOperator::Unknown(raw.to_string()),
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &str {
        match self {
            FilterOperator::Contains => "contains",
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::IsEmpty => "is_empty",
            FilterOperator::IsNotEmpty => "is_not_empty",
            FilterOperator::Unknown(raw) => raw,
        }
    }

    /// `false` for the emptiness checks, which ignore `valor`.
    pub fn uses_value(&self) -> bool {
        !matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }
}

impl From<String> for FilterOperator {
    fn from(raw: String) -> Self {
        FilterOperator::parse(&raw)
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key/operator/value rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(alias = "field")]
    pub campo: String,
    #[serde(alias = "operator")]
    pub operador: FilterOperator,
    #[serde(default, alias = "value")]
    pub valor: String,
}

impl FilterRule {
    pub fn new(campo: &str, operador: FilterOperator, valor: &str) -> Self {
        Self {
            campo: campo.to_string(),
            operador,
            valor: valor.to_string(),
        }
    }

    /// Parses `campo:operador[:valor]`, the compact form used on the CLI.
    pub fn parse_compact(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let campo = parts.next()?.trim();
        let operador = parts.next()?.trim();
        if campo.is_empty() || operador.is_empty() {
            return None;
        }
        let valor = parts.next().unwrap_or("");
        Some(Self::new(campo, FilterOperator::parse(operador), valor))
    }
}

/// How rules inside one group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// An ordered list of rules combined with a single operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    #[serde(default)]
    pub operator: GroupOperator,
    pub rules: Vec<FilterRule>,
}

impl FilterGroup {
    pub fn all(rules: Vec<FilterRule>) -> Self {
        Self {
            operator: GroupOperator::And,
            rules,
        }
    }

    pub fn any(rules: Vec<FilterRule>) -> Self {
        Self {
            operator: GroupOperator::Or,
            rules,
        }
    }
}

/// Treatment of rules whose field is absent from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    /// Only `is_empty` succeeds on an absent field.
    AllowEmpty,
    /// Every rule fails on an absent field.
    Reject,
}

/// Any of the filter shapes accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentFilter {
    Groups(Vec<FilterGroup>),
    Rules(Vec<FilterRule>),
    Values(BTreeMap<String, String>),
}

impl DocumentFilter {
    /// Applies the filter. A flat rule list behaves as one `AND` group.
    pub fn apply(&self, documents: &[Document]) -> Vec<Document> {
        match self {
            DocumentFilter::Groups(groups) => filter_documents(documents, groups),
            DocumentFilter::Rules(rules) => {
                filter_documents(documents, std::slice::from_ref(&FilterGroup::all(rules.clone())))
            }
            DocumentFilter::Values(values) => filter_by_values(documents, values),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DocumentFilter::Groups(g) => g.iter().all(|g| g.rules.is_empty()),
            DocumentFilter::Rules(r) => r.is_empty(),
            DocumentFilter::Values(v) => v.values().all(|v| v.trim().is_empty()),
        }
    }
}

/// Evaluates one rule against a document's metadata.
pub fn evaluate_rule(metadata: &Metadata, rule: &FilterRule, missing: MissingField) -> bool {
    let present: Vec<String> = metadata
        .get(&rule.campo)
        .unwrap_or(&[])
        .iter()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_lowercase())
        .collect();

    if present.is_empty() {
        return missing == MissingField::AllowEmpty && rule.operador == FilterOperator::IsEmpty;
    }

    let wanted = rule.valor.to_lowercase();
    let blank = present.iter().all(|v| v.trim().is_empty());

    match &rule.operador {
        FilterOperator::Contains => present.iter().any(|v| v.contains(&wanted)),
        FilterOperator::Equals => present.iter().any(|v| *v == wanted),
        FilterOperator::NotEquals => !present.iter().any(|v| *v == wanted),
        FilterOperator::StartsWith => present.iter().any(|v| v.starts_with(&wanted)),
        FilterOperator::EndsWith => present.iter().any(|v| v.ends_with(&wanted)),
        FilterOperator::IsEmpty => blank,
        FilterOperator::IsNotEmpty => !blank,
        FilterOperator::Unknown(_) => false,
    }
}

/// Evaluates a group; a group without rules always matches.
pub fn group_matches(metadata: &Metadata, group: &FilterGroup, missing: MissingField) -> bool {
    match group.operator {
        GroupOperator::And => group
            .rules
            .iter()
            .all(|r| evaluate_rule(metadata, r, missing)),
        GroupOperator::Or => {
            group.rules.is_empty()
                || group
                    .rules
                    .iter()
                    .any(|r| evaluate_rule(metadata, r, missing))
        }
    }
}

/// `true` when the document satisfies every group.
pub fn matches(document: &Document, groups: &[FilterGroup]) -> bool {
    groups
        .iter()
        .all(|g| group_matches(&document.metadata, g, MissingField::AllowEmpty))
}

/// Documents satisfying every group, in input order.
pub fn filter_documents(documents: &[Document], groups: &[FilterGroup]) -> Vec<Document> {
    documents
        .iter()
        .filter(|d| matches(d, groups))
        .cloned()
        .collect()
}

/// The rule editor's test run: a flat rule list with implicit `AND`,
/// rejecting documents that lack a referenced field.
pub fn test_rules(documents: &[Document], rules: &[FilterRule]) -> Vec<Document> {
    documents
        .iter()
        .filter(|d| {
            rules
                .iter()
                .all(|r| evaluate_rule(&d.metadata, r, MissingField::Reject))
        })
        .cloned()
        .collect()
}

/// Value-map filter (case-insensitive substring per key, ANDed).
pub fn filter_by_values(documents: &[Document], filters: &BTreeMap<String, String>) -> Vec<Document> {
    let active: Vec<(&str, String)> = filters
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.as_str(), v.to_lowercase()))
        .collect();

    documents
        .iter()
        .filter(|d| {
            active.iter().all(|(key, wanted)| {
                d.metadata
                    .get(key)
                    .map(|values| values.iter().any(|v| v.to_lowercase().contains(wanted)))
                    .unwrap_or(false)
            })
        })
        .cloned()
        .collect()
}
