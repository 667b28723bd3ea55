//! # ragdesk core
//!
//! Runtime-free logic shared by the `rdk` server and CLI: the document
//! model, metadata clusters and value extraction, the filter/rule
//! evaluator, the upload wizard state machine with its session
//! persistence boundary, the chat-driven pending upload, slash-command
//! parsing, content validation, and the [`registry::DocumentRegistry`]
//! trait.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O.

pub mod clusters;
pub mod command;
pub mod error;
pub mod extract;
pub mod filter;
pub mod models;
pub mod pending;
pub mod registry;
pub mod validate;
pub mod wizard;

pub use error::{ClusterError, RegistryError, ValidationError, WizardError};
pub use models::{Document, Metadata, MetadataValue};
