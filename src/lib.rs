//! # ragdesk
//!
//! A document desk over a hosted RAG registry (Ragie). Documents are
//! uploaded with client, tool and type metadata, listed and narrowed with
//! metadata filters and rule groups, and searched from a slash-command
//! chat that can also hand plain questions to an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  CLI (rdk)   │──▶│ ragdesk-core  │◀──│  HTTP (axum) │
//! └──────────────┘   │ filters/wizard│   └──────┬───────┘
//!                    └───────┬───────┘          │
//!                            ▼                  ▼
//!                   ┌────────────────┐   ┌──────────────┐
//!                   │ DocumentRegistry│  │ ChatProvider │
//!                   │ Ragie / memory │   │ Gemini / Groq│
//!                   └────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export RAGIE_API_KEY=...
//! rdk docs list --filter cliente=acme
//! rdk upload ./manuais --cliente Acme --ferramenta Zendesk
//! rdk serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ragie`] | Ragie HTTP client implementing the registry trait |
//! | [`llm`] | Chat provider abstraction (Gemini, Groq) |
//! | [`chat`] | Slash-command dispatch and chat-driven uploads |
//! | [`upload`] | Concurrent batch submission, directory collection |
//! | [`filters`] | Saved filter sets |
//! | [`sessions`] | Wizard and chat session registries |
//! | [`docs`] | Listing commands for the CLI |
//! | [`server`] | HTTP API server |

pub mod chat;
pub mod config;
pub mod docs;
pub mod filters;
pub mod llm;
pub mod ragie;
pub mod server;
pub mod sessions;
pub mod upload;
