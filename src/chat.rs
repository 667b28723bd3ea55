//! Chat dispatch.
//!
//! Input starting with `/` is matched against the command table; anything
//! else goes to the configured [`ChatProvider`] together with the session's
//! history. While a chat-driven upload is pending, plain input answers the
//! upload's current question instead.
//!
//! [`ChatDispatcher::dispatch`] never fails: registry and provider errors
//! come back as a reply string.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

use ragdesk_core::command::{self, ChatInput, SlashCommand};
use ragdesk_core::pending::{PendingStep, PendingUpload, ReadyUpload};
use ragdesk_core::registry::DocumentRegistry;
use ragdesk_core::validate::{ensure_json_suffix, validate_content};
use ragdesk_core::Metadata;

use crate::llm::{ChatMessage, ChatProvider};

/// Chunks requested from the registry for `/search`.
pub const SEARCH_TOP_K: usize = 5;

/// Per-user chat state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    pub history: Vec<ChatMessage>,
    /// `/upload` was issued and the next message is the content.
    #[serde(default)]
    pub upload_requested: bool,
    #[serde(default)]
    pub pending: Option<PendingUpload>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct ChatDispatcher {
    registry: Arc<dyn DocumentRegistry>,
    provider: Arc<dyn ChatProvider>,
    system_prompt: Option<String>,
}

impl ChatDispatcher {
    pub fn new(
        registry: Arc<dyn DocumentRegistry>,
        provider: Arc<dyn ChatProvider>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            registry,
            provider,
            system_prompt,
        }
    }

    /// Handles one line of user input and returns the reply.
    pub async fn dispatch(&self, session: &mut ChatSession, input: &str) -> String {
        match command::parse(input) {
            ChatInput::Command(cmd) => self.run_command(session, cmd).await,
            ChatInput::Message(text) => {
                if let Some(pending) = session.pending.take() {
                    return self.continue_upload(session, pending, &text).await;
                }
                if session.upload_requested {
                    return start_upload(session, &text);
                }
                self.ask_model(session, text).await
            }
        }
    }

    async fn run_command(&self, session: &mut ChatSession, cmd: SlashCommand) -> String {
        match cmd {
            SlashCommand::Docs => self.list_docs().await,
            SlashCommand::Upload => {
                session.pending = None;
                session.upload_requested = true;
                "Paste the JSON content you want to upload.".to_string()
            }
            SlashCommand::Cancel => {
                let had = session.pending.take().is_some() || session.upload_requested;
                session.upload_requested = false;
                if had {
                    "Upload cancelled.".to_string()
                } else {
                    "Nothing to cancel.".to_string()
                }
            }
            SlashCommand::Search { scope, query } => self.search(&scope, &query).await,
            SlashCommand::UploadRaw { scope, content } => self.upload_raw(&scope, &content).await,
            SlashCommand::Usage(usage) => format!("Usage: {}", usage),
            SlashCommand::Unknown(name) => command::unknown_command_message(&name),
        }
    }

    async fn list_docs(&self) -> String {
        match self.registry.list_documents(None).await {
            Ok(docs) if docs.is_empty() => "No documents found.".to_string(),
            Ok(docs) => {
                let mut out = format!("Documents ({}):", docs.len());
                for d in &docs {
                    let _ = write!(out, "\n- {} ({})", d.name, d.id);
                }
                out
            }
            Err(e) => error_reply(&e),
        }
    }

    async fn search(&self, scope: &str, query: &str) -> String {
        let filter = json!({ "scope": scope });
        match self.registry.retrieve(query, Some(filter), SEARCH_TOP_K).await {
            Ok(chunks) if chunks.is_empty() => {
                format!("No results for \"{}\" in scope \"{}\".", query, scope)
            }
            Ok(chunks) => {
                let mut out = format!("Results for \"{}\" in scope \"{}\":", query, scope);
                for (i, c) in chunks.iter().enumerate() {
                    let _ = write!(
                        out,
                        "\n{}. [{}] (score {:.2})\n{}",
                        i + 1,
                        c.document_name,
                        c.score,
                        c.text
                    );
                }
                out
            }
            Err(e) => error_reply(&e),
        }
    }

    async fn upload_raw(&self, scope: &str, content: &str) -> String {
        let check = match validate_content(content) {
            Ok(c) => c,
            Err(e) => return error_reply(&e),
        };
        let name = ensure_json_suffix(&check.suggested_name);
        let metadata = Metadata::new().with("scope", scope);
        match self.registry.upload_raw(&name, check.value, metadata).await {
            Ok(doc) => format!("Uploaded \"{}\" to scope \"{}\" (id {}).", doc.name, scope, doc.id),
            Err(e) => error_reply(&e),
        }
    }

    async fn continue_upload(
        &self,
        session: &mut ChatSession,
        mut pending: PendingUpload,
        input: &str,
    ) -> String {
        match pending.accept(input) {
            PendingStep::Reply(text) => {
                session.pending = Some(pending);
                text
            }
            PendingStep::Ready(ready) => match self.submit(ready).await {
                Ok(reply) => reply,
                Err(reply) => {
                    // Let the user resend metadata or cancel.
                    pending.awaiting_metadata = true;
                    session.pending = Some(pending);
                    reply
                }
            },
        }
    }

    async fn submit(&self, ready: ReadyUpload) -> Result<String, String> {
        let ReadyUpload {
            name,
            data,
            metadata,
        } = ready;
        match self.registry.upload_raw(&name, data, metadata).await {
            Ok(doc) => {
                tracing::info!(id = %doc.id, name = %doc.name, "chat upload completed");
                Ok(format!("Uploaded \"{}\" (id {}).", doc.name, doc.id))
            }
            Err(e) => Err(format!("{} Send the metadata again or /cancel.", error_reply(&e))),
        }
    }

    async fn ask_model(&self, session: &mut ChatSession, text: String) -> String {
        session.history.push(ChatMessage::user(text));
        match self
            .provider
            .complete(self.system_prompt.as_deref(), &session.history)
            .await
        {
            Ok(answer) => {
                session.history.push(ChatMessage::assistant(answer.clone()));
                answer
            }
            Err(e) => {
                session.history.pop();
                tracing::warn!(provider = self.provider.name(), error = %e, "completion failed");
                format!("Error: {:#}", e)
            }
        }
    }
}

fn start_upload(session: &mut ChatSession, content: &str) -> String {
    match PendingUpload::from_content(content) {
        Ok(pending) => {
            let prompt = pending.prompt();
            session.upload_requested = false;
            session.pending = Some(pending);
            prompt
        }
        Err(e) => format!("{} Paste valid JSON or /cancel.", error_reply(&e)),
    }
}

/// `rdk chat <message>`: one exchange in a fresh session.
pub async fn run_chat(dispatcher: &ChatDispatcher, message: &str) -> anyhow::Result<()> {
    if message.trim().is_empty() {
        anyhow::bail!("message must not be empty");
    }
    let mut session = ChatSession::new();
    println!("{}", dispatcher.dispatch(&mut session, message).await);
    Ok(())
}

fn error_reply(e: &dyn std::error::Error) -> String {
    format!("Error: {}.", e)
}
