//! # ragdesk CLI (`rdk`)
//!
//! The `rdk` binary drives the document desk from a terminal and starts
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! rdk --config ./config/rdk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rdk serve` | Start the HTTP API server |
//! | `rdk docs list` | List documents, optionally filtered |
//! | `rdk docs delete <id>` | Delete a document |
//! | `rdk metadata` | Distinct values per metadata cluster |
//! | `rdk clusters` | Show the configured clusters |
//! | `rdk clientes` | Distinct clients |
//! | `rdk upload <dir>` | Upload a directory under one tool |
//! | `rdk validate <file>` | Check a structured JSON document |
//! | `rdk chat "<message>"` | One chat exchange (slash commands work) |
//! | `rdk completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Documents of one client
//! rdk docs list --filter cliente=acme
//!
//! # Rules, ORed together
//! rdk docs list --rule tipo:equals:manual --rule Ferramenta:contains:zen --any
//!
//! # Upload a folder of manuals
//! rdk upload ./manuais --cliente Acme --ferramenta Zendesk --tipo manual
//!
//! # Search through the chat command table
//! rdk chat "/search Acme reset password"
//! ```
//!
//! The registry key is read from `RAGIE_API_KEY`. `--offline` swaps in an
//! empty in-memory registry and no LLM.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragdesk::chat::{run_chat, ChatDispatcher};
use ragdesk::config::{self, Config};
use ragdesk::docs::{self, ListOptions};
use ragdesk::llm::{create_provider, ChatProvider, DisabledProvider};
use ragdesk::ragie::RagieClient;
use ragdesk::server;
use ragdesk::upload::run_upload;
use ragdesk_core::registry::memory::InMemoryRegistry;
use ragdesk_core::registry::DocumentRegistry;

/// ragdesk: upload, filter and chat over a hosted RAG document registry.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "rdk",
    about = "ragdesk: upload, filter and chat over a hosted RAG document registry",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rdk.toml")]
    config: PathBuf,

    /// Use an empty in-memory registry and no LLM.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind` (default `127.0.0.1:3000`).
    Serve,

    /// Document listing and removal.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Distinct metadata values.
    ///
    /// Lists the configured cluster keys by default. With `--all`, every
    /// key found on any document plus the default keys.
    Metadata {
        #[arg(long)]
        all: bool,
    },

    /// Show the configured metadata clusters.
    Clusters,

    /// List distinct clients.
    Clientes,

    /// Upload every file under a directory.
    ///
    /// Each file is tagged with the client, the tool (`Ferramenta`) and
    /// the type. Uploads run concurrently; failures are reported per file
    /// and the command exits non-zero when any upload failed.
    Upload {
        /// Directory to upload.
        dir: PathBuf,

        #[arg(long)]
        cliente: String,

        #[arg(long)]
        ferramenta: String,

        /// Document type (default `documento`).
        #[arg(long, default_value = "")]
        tipo: String,
    },

    /// Check that a file is a JSON object or a non-empty JSON array.
    Validate { file: PathBuf },

    /// Send one chat message.
    Chat { message: String },

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents.
    List {
        /// `key=value` substring filter. Repeatable, all must match.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// `campo:operador[:valor]` rule. Repeatable.
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Match documents satisfying any rule instead of all.
        #[arg(long)]
        any: bool,
    },

    /// Delete a document by id.
    Delete { id: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn registry_for(cfg: &Config, offline: bool) -> Result<Arc<dyn DocumentRegistry>> {
    if offline {
        return Ok(Arc::new(InMemoryRegistry::new()));
    }
    Ok(Arc::new(RagieClient::from_env(&cfg.registry)?))
}

fn provider_for(cfg: &Config, offline: bool) -> Result<Arc<dyn ChatProvider>> {
    if offline {
        return Ok(Arc::new(DisabledProvider));
    }
    Ok(Arc::from(create_provider(&cfg.llm)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that need neither config nor registry
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "rdk", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { file } => {
            return docs::run_validate(file);
        }
        _ => {}
    }

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            if cli.offline {
                let registry = registry_for(&cfg, true)?;
                let provider = provider_for(&cfg, true)?;
                server::run_server_with(&cfg, registry, provider).await?;
            } else {
                server::run_server(&cfg).await?;
            }
        }
        Commands::Docs { action } => {
            let registry = registry_for(&cfg, cli.offline)?;
            match action {
                DocsAction::List {
                    filters,
                    rules,
                    any,
                } => {
                    let options = ListOptions {
                        values: filters,
                        rules,
                        any,
                    };
                    docs::run_list(registry.as_ref(), &options).await?;
                }
                DocsAction::Delete { id } => {
                    docs::run_delete(registry.as_ref(), &id).await?;
                }
            }
        }
        Commands::Metadata { all } => {
            let registry = registry_for(&cfg, cli.offline)?;
            docs::run_metadata(registry.as_ref(), &cfg, all).await?;
        }
        Commands::Clusters => {
            docs::run_clusters(&cfg.metadata.cluster_set()?);
        }
        Commands::Clientes => {
            let registry = registry_for(&cfg, cli.offline)?;
            docs::run_clientes(registry.as_ref()).await?;
        }
        Commands::Upload {
            dir,
            cliente,
            ferramenta,
            tipo,
        } => {
            let registry = registry_for(&cfg, cli.offline)?;
            run_upload(registry.as_ref(), &cfg.upload, &dir, &cliente, &ferramenta, &tipo).await?;
        }
        Commands::Chat { message } => {
            let registry = registry_for(&cfg, cli.offline)?;
            let provider = provider_for(&cfg, cli.offline)?;
            let dispatcher = ChatDispatcher::new(registry, provider, cfg.llm.system_prompt.clone());
            run_chat(&dispatcher, &message).await?;
        }
        Commands::Completions { .. } | Commands::Validate { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
