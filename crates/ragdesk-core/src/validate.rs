//! Content and credential validation.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ValidationError;

/// A validated structured document.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentCheck {
    pub value: Value,
    pub suggested_name: String,
}

/// Checks that `text` is a JSON object or a non-empty JSON array.
pub fn validate_content(text: &str) -> Result<ContentCheck, ValidationError> {
    validate_content_at(text, Utc::now())
}

/// [`validate_content`] with an explicit clock for the fallback name.
pub fn validate_content_at(text: &str, now: DateTime<Utc>) -> Result<ContentCheck, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    match &value {
        Value::Object(_) => {}
        Value::Array(items) if !items.is_empty() => {}
        _ => return Err(ValidationError::UnsupportedShape),
    }
    let suggested_name = suggest_name(&value, now);
    Ok(ContentCheck {
        value,
        suggested_name,
    })
}

/// Name for a structured document: its `title`/`titulo`/`name`/`nome`
/// field when present, otherwise a timestamped default. Always ends in
/// `.json`.
pub fn suggest_name(value: &Value, now: DateTime<Utc>) -> String {
    let from_field = ["title", "titulo", "name", "nome"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(sanitize_name)
        .filter(|n| !n.is_empty());

    let base = from_field.unwrap_or_else(|| format!("documento-{}", now.format("%Y%m%d-%H%M%S")));
    ensure_json_suffix(&base)
}

/// Appends `.json` unless already present (case-insensitive).
pub fn ensure_json_suffix(name: &str) -> String {
    let name = name.trim();
    if name.to_lowercase().ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    }
}

pub(crate) fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned.trim_matches(|c| c == '-' || c == ' ').to_string()
}

/// Which credential is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyKind {
    Ragie,
    Gemini,
    Groq,
}

impl ApiKeyKind {
    pub fn label(self) -> &'static str {
        match self {
            ApiKeyKind::Ragie => "Ragie",
            ApiKeyKind::Gemini => "Gemini",
            ApiKeyKind::Groq => "Groq",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ApiKeyKind::Ragie => "tnt_",
            ApiKeyKind::Gemini => "AIza",
            ApiKeyKind::Groq => "gsk_",
        }
    }

    fn min_len(self) -> usize {
        match self {
            ApiKeyKind::Ragie => 20,
            ApiKeyKind::Gemini => 30,
            ApiKeyKind::Groq => 20,
        }
    }
}

/// Prefix and length check for an API key.
pub fn check_api_key(kind: ApiKeyKind, key: &str) -> Result<(), ValidationError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ValidationError::MissingKey(kind.label()));
    }
    if !key.starts_with(kind.prefix()) {
        return Err(ValidationError::InvalidKey(
            kind.label(),
            format!("must start with '{}'", kind.prefix()),
        ));
    }
    if key.len() < kind.min_len() {
        return Err(ValidationError::InvalidKey(
            kind.label(),
            format!("must be at least {} characters", kind.min_len()),
        ));
    }
    Ok(())
}

/// Trims `value`, failing when nothing is left.
pub fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        Err(ValidationError::RequiredField(field))
    } else {
        Ok(v)
    }
}
