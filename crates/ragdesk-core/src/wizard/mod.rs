//! Upload wizard state machine.
//!
//! The wizard walks a batch of files through five steps:
//!
//! ```text
//! CollectFiles ──▶ AssociateTools ──▶ Review ──▶ Submit ──▶ Complete
//!      ▲                │  ▲ (multi-tool: loop   │
//!      └────── back ────┘  └── until every file ─┘ back
//!                              has a tool)
//! ```
//!
//! Two variants exist. [`WizardVariant::SingleTool`] allows one tool per
//! batch and drops files left unassociated when leaving the association
//! step. [`WizardVariant::MultiTool`] keeps asking for the next tool until
//! no unassociated files remain.
//!
//! The machine itself is purely in-memory; [`session`] is the only place
//! it is serialized.

pub mod session;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::WizardError;
use crate::models::{Metadata, UploadRequest};

/// Document type attached to wizard uploads unless overridden.
pub const DEFAULT_TIPO: &str = "documento";

/// Wizard steps, numbered as the UI shows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Step {
    CollectFiles = 1,
    AssociateTools = 2,
    Review = 3,
    Submit = 4,
    Complete = 5,
}

impl Step {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Step::CollectFiles),
            2 => Some(Step::AssociateTools),
            3 => Some(Step::Review),
            4 => Some(Step::Submit),
            5 => Some(Step::Complete),
            _ => None,
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.number()
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, String> {
        Step::from_number(n).ok_or_else(|| format!("no wizard step {}", n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardVariant {
    #[default]
    SingleTool,
    MultiTool,
}

/// A selected file with its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardFile {
    pub name: String,
    pub content_type: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl WizardFile {
    pub fn new(name: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A user-named grouping of files ("Ferramenta").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub files: BTreeSet<String>,
    #[serde(default)]
    pub is_expanded: bool,
    #[serde(default)]
    pub search_term: String,
}

impl Tool {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: BTreeSet::new(),
            is_expanded: true,
            search_term: String::new(),
        }
    }

    /// Candidate file names visible under this tool's search term.
    pub fn visible<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        let term = self.search_term.trim().to_lowercase();
        names
            .into_iter()
            .filter(|n| term.is_empty() || n.to_lowercase().contains(&term))
            .collect()
    }
}

/// Everything collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    pub cliente: String,
    pub tipo: String,
    pub files: Vec<WizardFile>,
    pub tools: Vec<Tool>,
}

impl Batch {
    fn file(&self, name: &str) -> Option<&WizardFile> {
        self.files.iter().find(|f| f.name == name)
    }

    fn tool_mut(&mut self, name: &str) -> Result<&mut Tool, WizardError> {
        self.tools
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| WizardError::UnknownTool(name.to_string()))
    }

    /// The tool currently holding `file`.
    pub fn tool_of(&self, file: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.files.contains(file))
    }

    /// Files not associated with any tool, in selection order.
    pub fn unassigned(&self) -> Vec<&str> {
        self.files
            .iter()
            .map(|f| f.name.as_str())
            .filter(|n| self.tool_of(n).is_none())
            .collect()
    }

    fn has_associations(&self) -> bool {
        self.tools.iter().any(|t| !t.files.is_empty())
    }
}

/// Result of one registry upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn ok(file: &str, document_id: &str) -> Self {
        Self {
            file: file.to_string(),
            document_id: Some(document_id.to_string()),
            error: None,
        }
    }

    pub fn failed(file: &str, error: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            document_id: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-file results of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitReport {
    pub outcomes: Vec<UploadOutcome>,
}

impl SubmitReport {
    /// `true` only when there was something to upload and all of it landed.
    pub fn succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(UploadOutcome::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// Wizard state with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardState {
    CollectFiles(Batch),
    AssociateTools(Batch),
    Review(Batch),
    Submitting(Batch),
    Complete(SubmitReport),
}

impl WizardState {
    pub fn step(&self) -> Step {
        match self {
            WizardState::CollectFiles(_) => Step::CollectFiles,
            WizardState::AssociateTools(_) => Step::AssociateTools,
            WizardState::Review(_) => Step::Review,
            WizardState::Submitting(_) => Step::Submit,
            WizardState::Complete(_) => Step::Complete,
        }
    }
}

/// What leaving the association step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved on to review.
    Review,
    /// Multi-tool flow: files remain, create tool number `n` next.
    NextTool(usize),
}

/// Outcome of asking to show a given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "step", rename_all = "snake_case")]
pub enum Navigation {
    Render(Step),
    Redirect(Step),
}

/// The upload wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadWizard {
    variant: WizardVariant,
    state: WizardState,
}

impl UploadWizard {
    pub fn new(variant: WizardVariant) -> Self {
        Self {
            variant,
            state: WizardState::CollectFiles(Batch {
                tipo: DEFAULT_TIPO.to_string(),
                ..Batch::default()
            }),
        }
    }

    pub(crate) fn from_parts(variant: WizardVariant, state: WizardState) -> Self {
        Self { variant, state }
    }

    pub fn variant(&self) -> WizardVariant {
        self.variant
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn step(&self) -> Step {
        self.state.step()
    }

    /// The batch, for every state but `Complete`.
    pub fn batch(&self) -> Option<&Batch> {
        match &self.state {
            WizardState::CollectFiles(b)
            | WizardState::AssociateTools(b)
            | WizardState::Review(b)
            | WizardState::Submitting(b) => Some(b),
            WizardState::Complete(_) => None,
        }
    }

    /// Report of the completed submission.
    pub fn report(&self) -> Option<&SubmitReport> {
        match &self.state {
            WizardState::Complete(r) => Some(r),
            _ => None,
        }
    }

    fn collecting(&mut self) -> Result<&mut Batch, WizardError> {
        match &mut self.state {
            WizardState::CollectFiles(b) => Ok(b),
            other => Err(WizardError::WrongStep(other.step().number())),
        }
    }

    fn associating(&mut self) -> Result<&mut Batch, WizardError> {
        match &mut self.state {
            WizardState::AssociateTools(b) => Ok(b),
            other => Err(WizardError::WrongStep(other.step().number())),
        }
    }

    // ── Step 1: CollectFiles ──────────────────────────────────────────

    pub fn set_client(&mut self, cliente: &str) -> Result<(), WizardError> {
        self.collecting()?.cliente = cliente.trim().to_string();
        Ok(())
    }

    /// Sets the document type; blank resets to [`DEFAULT_TIPO`].
    pub fn set_tipo(&mut self, tipo: &str) -> Result<(), WizardError> {
        let tipo = tipo.trim();
        self.collecting()?.tipo = if tipo.is_empty() {
            DEFAULT_TIPO.to_string()
        } else {
            tipo.to_string()
        };
        Ok(())
    }

    pub fn add_file(&mut self, file: WizardFile) -> Result<(), WizardError> {
        let batch = self.collecting()?;
        if batch.file(&file.name).is_some() {
            return Err(WizardError::DuplicateFile(file.name));
        }
        batch.files.push(file);
        Ok(())
    }

    /// Removes a file from the selection and from whichever tool held it.
    pub fn remove_file(&mut self, name: &str) -> Result<(), WizardError> {
        let batch = self.collecting()?;
        let before = batch.files.len();
        batch.files.retain(|f| f.name != name);
        if batch.files.len() == before {
            return Err(WizardError::UnknownFile(name.to_string()));
        }
        for tool in &mut batch.tools {
            tool.files.remove(name);
        }
        Ok(())
    }

    /// CollectFiles → AssociateTools; needs a file and a client.
    pub fn proceed_to_tools(&mut self) -> Result<(), WizardError> {
        let batch = self.collecting()?;
        if batch.files.is_empty() {
            return Err(WizardError::NoFiles);
        }
        if batch.cliente.is_empty() {
            return Err(WizardError::MissingClient);
        }
        let batch = std::mem::take(batch);
        self.state = WizardState::AssociateTools(batch);
        Ok(())
    }

    // ── Step 2: AssociateTools ────────────────────────────────────────

    pub fn create_tool(&mut self, name: &str) -> Result<(), WizardError> {
        let variant = self.variant;
        let batch = self.associating()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WizardError::EmptyToolName);
        }
        if batch
            .tools
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name))
        {
            return Err(WizardError::DuplicateTool(name.to_string()));
        }
        if variant == WizardVariant::SingleTool && !batch.tools.is_empty() {
            return Err(WizardError::SingleToolLimit);
        }
        batch.tools.push(Tool::new(name));
        Ok(())
    }

    /// Associates `file` with `tool`, moving it out of any other tool.
    pub fn assign(&mut self, file: &str, tool: &str) -> Result<(), WizardError> {
        let batch = self.associating()?;
        if batch.file(file).is_none() {
            return Err(WizardError::UnknownFile(file.to_string()));
        }
        batch.tool_mut(tool)?;
        for t in &mut batch.tools {
            t.files.remove(file);
        }
        batch.tool_mut(tool)?.files.insert(file.to_string());
        Ok(())
    }

    pub fn unassign(&mut self, file: &str) -> Result<(), WizardError> {
        let batch = self.associating()?;
        if batch.file(file).is_none() {
            return Err(WizardError::UnknownFile(file.to_string()));
        }
        for t in &mut batch.tools {
            t.files.remove(file);
        }
        Ok(())
    }

    pub fn set_search_term(&mut self, tool: &str, term: &str) -> Result<(), WizardError> {
        self.associating()?.tool_mut(tool)?.search_term = term.to_string();
        Ok(())
    }

    pub fn toggle_expanded(&mut self, tool: &str) -> Result<bool, WizardError> {
        let t = self.associating()?.tool_mut(tool)?;
        t.is_expanded = !t.is_expanded;
        Ok(t.is_expanded)
    }

    /// Leaves the association step.
    ///
    /// Single-tool batches drop unassociated files and go to review.
    /// Multi-tool batches stay here and ask for the next tool while any
    /// file is still unassociated.
    pub fn advance(&mut self) -> Result<Advance, WizardError> {
        let variant = self.variant;
        let batch = self.associating()?;
        if !batch.has_associations() {
            return Err(WizardError::NoAssociations);
        }

        match variant {
            WizardVariant::SingleTool => {
                let keep: BTreeSet<String> = batch
                    .tools
                    .iter()
                    .flat_map(|t| t.files.iter().cloned())
                    .collect();
                batch.files.retain(|f| keep.contains(&f.name));
            }
            WizardVariant::MultiTool => {
                if !batch.unassigned().is_empty() {
                    return Ok(Advance::NextTool(batch.tools.len() + 1));
                }
            }
        }

        let batch = std::mem::take(batch);
        self.state = WizardState::Review(batch);
        Ok(Advance::Review)
    }

    /// Steps back one state, keeping collected data.
    pub fn back(&mut self) -> Result<Step, WizardError> {
        let state = std::mem::replace(&mut self.state, WizardState::Complete(SubmitReport::default()));
        let (next, result) = match state {
            WizardState::AssociateTools(b) => (WizardState::CollectFiles(b), Ok(Step::CollectFiles)),
            WizardState::Review(b) => (WizardState::AssociateTools(b), Ok(Step::AssociateTools)),
            other => {
                let step = other.step().number();
                (other, Err(WizardError::WrongStep(step)))
            }
        };
        self.state = next;
        result
    }

    // ── Steps 3-5: Review, Submit, Complete ──────────────────────────

    /// One upload request per associated file, grouped by tool order.
    pub fn plan(&self) -> Result<Vec<UploadRequest>, WizardError> {
        match &self.state {
            WizardState::Review(b) | WizardState::Submitting(b) => Ok(build_plan(b)),
            other => Err(WizardError::WrongStep(other.step().number())),
        }
    }

    /// Review → Submit; returns the requests to send.
    pub fn begin_submit(&mut self) -> Result<Vec<UploadRequest>, WizardError> {
        let plan = match &mut self.state {
            WizardState::Review(b) => {
                let plan = build_plan(b);
                let batch = std::mem::take(b);
                self.state = WizardState::Submitting(batch);
                plan
            }
            other => return Err(WizardError::WrongStep(other.step().number())),
        };
        Ok(plan)
    }

    /// Records the submission results.
    ///
    /// A fully successful report completes the wizard. Any failure fails
    /// the whole step and returns to review; uploads that did succeed are
    /// not rolled back.
    pub fn finish(&mut self, report: SubmitReport) -> Result<bool, WizardError> {
        let batch = match &mut self.state {
            WizardState::Submitting(b) => std::mem::take(b),
            other => return Err(WizardError::WrongStep(other.step().number())),
        };
        if report.succeeded() {
            self.state = WizardState::Complete(report);
            Ok(true)
        } else {
            self.state = WizardState::Review(batch);
            Ok(false)
        }
    }

    /// Decides whether `requested` can be shown from the current state.
    ///
    /// Steps up to the current one render; later ones (whose predecessor
    /// state does not exist yet) redirect to step 1.
    pub fn enter(&self, requested: Step) -> Navigation {
        if requested <= self.step() {
            Navigation::Render(requested)
        } else {
            Navigation::Redirect(Step::CollectFiles)
        }
    }
}

fn build_plan(batch: &Batch) -> Vec<UploadRequest> {
    let mut plan = Vec::new();
    for tool in &batch.tools {
        for file in batch.files.iter().filter(|f| tool.files.contains(&f.name)) {
            let metadata = Metadata::new()
                .with("cliente", batch.cliente.as_str())
                .with("Ferramenta", tool.name.as_str())
                .with("tipo", batch.tipo.as_str())
                .with("document_name", file.name.as_str())
                .with("file_type", file.content_type.as_str())
                .with("file_size", file.size().to_string());
            plan.push(UploadRequest {
                name: file.name.clone(),
                content_type: file.content_type.clone(),
                data: file.data.clone(),
                metadata,
            });
        }
    }
    plan
}
