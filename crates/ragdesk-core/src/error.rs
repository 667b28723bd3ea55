//! Error types for ragdesk core operations.

use thiserror::Error;

/// Failures reported by a [`DocumentRegistry`](crate::registry::DocumentRegistry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The registry answered with a non-success status.
    #[error("registry error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The request did not complete in time (after the single retry).
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("invalid registry response: {0}")]
    Decode(String),
}

/// Upload wizard transition failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("operation not allowed in step {0}")]
    WrongStep(u8),

    #[error("client identifier must not be empty")]
    MissingClient,

    #[error("at least one file is required")]
    NoFiles,

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("file already selected: {0}")]
    DuplicateFile(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool already exists: {0}")]
    DuplicateTool(String),

    #[error("tool name must not be empty")]
    EmptyToolName,

    #[error("this upload flow accepts a single tool per batch")]
    SingleToolLimit,

    #[error("associate at least one file with a tool")]
    NoAssociations,

    #[error("invalid session state: {0}")]
    Corrupt(String),
}

/// Content and credential validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("JSON content must be an object or a non-empty array")]
    UnsupportedShape,

    #[error("{0} API key is missing")]
    MissingKey(&'static str),

    #[error("{0} API key is invalid: {1}")]
    InvalidKey(&'static str, String),

    #[error("{0} must not be empty")]
    RequiredField(&'static str),
}

/// Cluster configuration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("duplicate cluster key: {0}")]
    DuplicateKey(String),

    #[error("cluster key must not be empty")]
    EmptyKey,
}
