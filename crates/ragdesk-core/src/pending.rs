//! Chat-driven upload of a single structured document.
//!
//! A [`PendingUpload`] exists from the moment pasted content validates
//! until the document is submitted or the user cancels. It is session
//! state only; losing the session loses the upload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::models::Metadata;
use crate::validate::{ensure_json_suffix, sanitize_name, validate_content};

const CONFIRM: &[&str] = &["sim", "s", "yes", "y", "ok"];
const SKIP: &[&str] = &["pular", "skip", "-", "nenhum", "none"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpload {
    pub content: String,
    pub suggested_name: String,
    pub awaiting_name_confirmation: bool,
    pub awaiting_metadata: bool,
}

/// A pending upload that has everything it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyUpload {
    pub name: String,
    pub data: Value,
    pub metadata: Metadata,
}

/// What the next input produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingStep {
    /// Still collecting; show this text.
    Reply(String),
    Ready(ReadyUpload),
}

impl PendingUpload {
    /// Validates pasted content and starts the name confirmation.
    pub fn from_content(content: &str) -> Result<Self, ValidationError> {
        let check = validate_content(content)?;
        Ok(Self {
            content: content.trim().to_string(),
            suggested_name: check.suggested_name,
            awaiting_name_confirmation: true,
            awaiting_metadata: false,
        })
    }

    /// The question currently being asked.
    pub fn prompt(&self) -> String {
        if self.awaiting_name_confirmation {
            format!(
                "Content is valid. Save it as \"{}\"? Answer \"sim\" to confirm or type another name.",
                self.suggested_name
            )
        } else {
            "Add metadata as key=value pairs separated by commas, or \"pular\" to skip.".to_string()
        }
    }

    /// Feeds the next user input.
    pub fn accept(&mut self, input: &str) -> PendingStep {
        let answer = input.trim();

        if self.awaiting_name_confirmation {
            if !CONFIRM.contains(&answer.to_lowercase().as_str()) {
                let name = sanitize_name(answer);
                if name.is_empty() {
                    return PendingStep::Reply(self.prompt());
                }
                self.suggested_name = ensure_json_suffix(&name);
            }
            self.awaiting_name_confirmation = false;
            self.awaiting_metadata = true;
            return PendingStep::Reply(self.prompt());
        }

        let metadata = if SKIP.contains(&answer.to_lowercase().as_str()) || answer.is_empty() {
            Metadata::new()
        } else {
            match parse_pairs(answer) {
                Some(m) => m,
                None => {
                    return PendingStep::Reply(format!(
                        "Could not read \"{}\". {}",
                        answer,
                        self.prompt()
                    ))
                }
            }
        };

        // Content was validated on creation.
        let data = serde_json::from_str(&self.content).unwrap_or(Value::Null);
        self.awaiting_metadata = false;
        PendingStep::Ready(ReadyUpload {
            name: self.suggested_name.clone(),
            data,
            metadata,
        })
    }
}

/// Parses `k=v, k2=v2`; `None` when any pair lacks a key or `=`.
pub fn parse_pairs(input: &str) -> Option<Metadata> {
    let mut metadata = Metadata::new();
    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=')?;
        let k = k.trim();
        if k.is_empty() {
            return None;
        }
        metadata.insert(k, v.trim());
    }
    Some(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_content_creates_nothing() {
        assert!(PendingUpload::from_content("not json").is_err());
    }

    #[test]
    fn test_confirm_then_metadata() {
        let mut p = PendingUpload::from_content(r#"{"nome": "Regras"}"#).unwrap();
        assert_eq!(p.suggested_name, "Regras.json");
        assert!(p.awaiting_name_confirmation);

        assert!(matches!(p.accept("Sim"), PendingStep::Reply(_)));
        assert!(p.awaiting_metadata);

        match p.accept("cliente=Acme, tipo = filtro") {
            PendingStep::Ready(r) => {
                assert_eq!(r.name, "Regras.json");
                assert_eq!(r.metadata.first("cliente"), Some("Acme"));
                assert_eq!(r.metadata.first("tipo"), Some("filtro"));
                assert_eq!(r.data["nome"], "Regras");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rename_and_skip_metadata() {
        let mut p = PendingUpload::from_content(r#"{"a": 1}"#).unwrap();
        p.accept("meu documento");
        assert_eq!(p.suggested_name, "meu documento.json");
        match p.accept("pular") {
            PendingStep::Ready(r) => assert!(r.metadata.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_metadata_reprompts() {
        let mut p = PendingUpload::from_content(r#"{"a": 1}"#).unwrap();
        p.accept("ok");
        assert!(matches!(p.accept("cliente Acme"), PendingStep::Reply(_)));
        assert!(p.awaiting_metadata);
    }

    #[test]
    fn test_parse_pairs() {
        assert!(parse_pairs("=x").is_none());
        assert_eq!(parse_pairs("a=1,").unwrap().first("a"), Some("1"));
    }
}
