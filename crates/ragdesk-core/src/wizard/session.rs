//! Session-scoped persistence for the upload wizard.
//!
//! This is the single place the wizard is serialized. State lives under
//! two keys of a [`SessionStore`]:
//!
//! - [`UPLOAD_DATA`]: client, type, variant, step, file descriptors and
//!   tool associations (JSON).
//! - [`UPLOAD_FILES`]: file contents, each as a JSON array of bytes.
//!
//! There is no versioning and no size guard; a store with a quota may
//! reject large batches. Any request for a step whose predecessor state
//! cannot be restored redirects to step 1.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    Batch, Navigation, Step, SubmitReport, Tool, UploadWizard, WizardFile, WizardState,
    WizardVariant,
};
use crate::error::WizardError;

pub const UPLOAD_DATA: &str = "uploadData";
pub const UPLOAD_FILES: &str = "uploadFiles";

/// String key/value storage scoped to one user session.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

/// In-memory [`SessionStore`].
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    entries: HashMap<String, String>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Serialize, Deserialize)]
struct FileDescriptor {
    name: String,
    content_type: String,
    size: usize,
}

#[derive(Serialize, Deserialize)]
struct UploadData {
    variant: WizardVariant,
    step: u8,
    cliente: String,
    tipo: String,
    files: Vec<FileDescriptor>,
    tools: Vec<Tool>,
}

#[derive(Serialize, Deserialize)]
struct StoredFile {
    name: String,
    data: Vec<u8>,
}

/// Writes the wizard to the store. A completed wizard clears it instead.
pub fn save(store: &mut dyn SessionStore, wizard: &UploadWizard) -> Result<(), WizardError> {
    let batch = match wizard.batch() {
        Some(b) => b,
        None => {
            clear(store);
            return Ok(());
        }
    };

    // An in-flight submission is not durable; it resumes from review.
    let step = match wizard.step() {
        Step::Submit => Step::Review,
        s => s,
    };

    let data = UploadData {
        variant: wizard.variant(),
        step: step.number(),
        cliente: batch.cliente.clone(),
        tipo: batch.tipo.clone(),
        files: batch
            .files
            .iter()
            .map(|f| FileDescriptor {
                name: f.name.clone(),
                content_type: f.content_type.clone(),
                size: f.size(),
            })
            .collect(),
        tools: batch.tools.clone(),
    };
    let files: Vec<StoredFile> = batch
        .files
        .iter()
        .map(|f| StoredFile {
            name: f.name.clone(),
            data: f.data.clone(),
        })
        .collect();

    let data = serde_json::to_string(&data).map_err(|e| WizardError::Corrupt(e.to_string()))?;
    let files = serde_json::to_string(&files).map_err(|e| WizardError::Corrupt(e.to_string()))?;
    store.set(UPLOAD_DATA, data);
    store.set(UPLOAD_FILES, files);
    Ok(())
}

/// Rebuilds the wizard from the store.
///
/// Returns `Ok(None)` when no wizard was started, or when file contents
/// are missing for any described file.
pub fn restore(store: &dyn SessionStore) -> Result<Option<UploadWizard>, WizardError> {
    let raw = match store.get(UPLOAD_DATA) {
        Some(r) => r,
        None => return Ok(None),
    };
    let data: UploadData =
        serde_json::from_str(&raw).map_err(|e| WizardError::Corrupt(e.to_string()))?;

    let mut contents: HashMap<String, Vec<u8>> = match store.get(UPLOAD_FILES) {
        Some(raw) => serde_json::from_str::<Vec<StoredFile>>(&raw)
            .map_err(|e| WizardError::Corrupt(e.to_string()))?
            .into_iter()
            .map(|f| (f.name, f.data))
            .collect(),
        None if data.files.is_empty() => HashMap::new(),
        None => return Ok(None),
    };

    let mut files = Vec::with_capacity(data.files.len());
    for d in data.files {
        match contents.remove(&d.name) {
            Some(bytes) => files.push(WizardFile {
                name: d.name,
                content_type: d.content_type,
                data: bytes,
            }),
            None => return Ok(None),
        }
    }

    let batch = Batch {
        cliente: data.cliente,
        tipo: data.tipo,
        files,
        tools: data.tools,
    };
    let state = match Step::from_number(data.step) {
        Some(Step::CollectFiles) => WizardState::CollectFiles(batch),
        Some(Step::AssociateTools) => WizardState::AssociateTools(batch),
        Some(Step::Review) | Some(Step::Submit) => WizardState::Review(batch),
        Some(Step::Complete) => WizardState::Complete(SubmitReport::default()),
        None => return Err(WizardError::Corrupt(format!("unknown step {}", data.step))),
    };
    Ok(Some(UploadWizard::from_parts(data.variant, state)))
}

/// Removes every wizard key.
pub fn clear(store: &mut dyn SessionStore) {
    store.remove(UPLOAD_DATA);
    store.remove(UPLOAD_FILES);
}

/// Restore-or-redirect for a requested step.
///
/// Step 1 always renders. Any other step needs a restorable wizard that
/// has reached it; otherwise the caller is sent back to step 1. Corrupt
/// state is handled the same way.
pub fn navigate(store: &dyn SessionStore, requested: Step) -> Navigation {
    if requested == Step::CollectFiles {
        return Navigation::Render(Step::CollectFiles);
    }
    match restore(store) {
        Ok(Some(wizard)) => wizard.enter(requested),
        _ => Navigation::Redirect(Step::CollectFiles),
    }
}
