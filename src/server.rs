//! HTTP API server.
//!
//! Serves the document desk over JSON: registry passthrough with local
//! filtering, metadata and cluster listings, saved filter sets, the upload
//! wizard, batch uploads and chat.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/documents` | List documents; optional `filter` JSON and `cliente` |
//! | `POST` | `/api/documents` | Upload a structured JSON document |
//! | `GET` `DELETE` `PATCH` | `/api/documents/{id}` | Fetch, delete, patch metadata |
//! | `GET`  | `/api/documents/{id}/content` | Stored content |
//! | `POST` | `/api/documents/upload` | Batch upload with per-file results |
//! | `POST` | `/api/documents/validate` | Validate JSON content |
//! | `GET` `POST` | `/api/filters` | List (`?cliente=`) or create filter sets |
//! | `GET` `PATCH` `DELETE` | `/api/filters/{id}` | One filter set |
//! | `POST` | `/api/filters/test` | Run a flat rule list against a client's documents |
//! | `GET`  | `/api/metadata` | Every metadata key with its distinct values |
//! | `GET`  | `/api/clusters` | Configured clusters with derived values |
//! | `GET`  | `/api/clientes` | Distinct clients |
//! | `POST` | `/api/chat` | Slash-command-aware chat |
//! | `POST` | `/api/chat/completions` | Direct completion over a supplied history |
//! | `POST` | `/api/chat/stream` | Same, streamed as server-sent events |
//! | `POST` | `/api/wizard` | Start an upload wizard |
//! | `GET`  | `/api/wizard/{sid}/step/{n}` | Render or redirect to step 1 |
//! | `POST` | `/api/wizard/{sid}/files` `tools` `advance` `back` `submit` | Wizard operations |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "cliente must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500), `upstream` (502), `timeout` (504).
//!
//! Wizard requests whose session state is missing are not errors: they
//! answer `{"navigation": {"action": "redirect", "step": 1}}`.
//!
//! # Streaming
//!
//! `/api/chat/stream` answers `text/event-stream`: `chunk` events with
//! `{"text": ...}` in arrival order, then one `done` event. A provider
//! failure once the stream is open ends it with an `error` event whose
//! data follows the error contract above.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ragdesk_core::clusters::ClusterSet;
use ragdesk_core::extract::{distinct_values, extract_all_values, extract_values};
use ragdesk_core::filter::{test_rules, DocumentFilter, FilterOperator, FilterRule};
use ragdesk_core::registry::DocumentRegistry;
use ragdesk_core::validate::{ensure_json_suffix, require, validate_content};
use ragdesk_core::wizard::{
    Advance, Navigation, Step, SubmitReport, UploadWizard, WizardFile, WizardVariant,
};
use ragdesk_core::{Document, Metadata, RegistryError, ValidationError, WizardError};

use crate::chat::ChatDispatcher;
use crate::config::Config;
use crate::filters::{FilterSetPatch, FilterStore, NewFilterSet};
use crate::llm::{create_provider, ChatMessage, ChatProvider};
use crate::ragie::RagieClient;
use crate::sessions::{ChatSessions, Restored, WizardSessions, WizardView};
use crate::upload::{submit_batch, upload_with_tool};

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<dyn DocumentRegistry>,
    provider: Arc<dyn ChatProvider>,
    clusters: Arc<ClusterSet>,
    filters: Arc<FilterStore>,
    wizards: Arc<WizardSessions>,
    chats: Arc<ChatSessions>,
    dispatcher: Arc<ChatDispatcher>,
}

impl AppState {
    pub fn new(
        config: &Config,
        registry: Arc<dyn DocumentRegistry>,
        provider: Arc<dyn ChatProvider>,
    ) -> anyhow::Result<Self> {
        let filters = match &config.filters.path {
            Some(path) => FilterStore::open(path)?,
            None => FilterStore::in_memory(),
        };
        let session_ttl = Duration::from_secs(config.server.session_ttl_secs);
        let dispatcher = ChatDispatcher::new(
            registry.clone(),
            provider.clone(),
            config.llm.system_prompt.clone(),
        );
        Ok(Self {
            config: Arc::new(config.clone()),
            clusters: Arc::new(config.metadata.cluster_set()?),
            registry,
            provider,
            filters: Arc::new(filters),
            wizards: Arc::new(WizardSessions::with_ttl(session_ttl)),
            chats: Arc::new(ChatSessions::with_ttl(session_ttl)),
            dispatcher: Arc::new(dispatcher),
        })
    }
}

/// Starts the server against the Ragie registry and the configured LLM.
///
/// Fails before binding when `RAGIE_API_KEY` or the provider key is
/// missing or malformed.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let registry = Arc::new(RagieClient::from_env(&config.registry)?);
    let provider: Arc<dyn ChatProvider> = Arc::from(create_provider(&config.llm)?);
    run_server_with(config, registry, provider).await
}

/// Starts the server with explicit collaborators.
///
/// Used by `rdk --offline serve` and by tests with an in-memory registry.
pub async fn run_server_with(
    config: &Config,
    registry: Arc<dyn DocumentRegistry>,
    provider: Arc<dyn ChatProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config, registry, provider)?;
    let app = router(state);

    tracing::info!(bind = %bind_addr, "ragdesk server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The full route table over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/documents", get(handle_list_documents).post(handle_create_document))
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents/validate", post(handle_validate))
        .route(
            "/api/documents/{id}",
            get(handle_get_document)
                .delete(handle_delete_document)
                .patch(handle_patch_document),
        )
        .route("/api/documents/{id}/content", get(handle_document_content))
        .route("/api/filters", get(handle_list_filters).post(handle_create_filter))
        .route("/api/filters/test", post(handle_test_filter))
        .route(
            "/api/filters/{id}",
            get(handle_get_filter)
                .patch(handle_patch_filter)
                .delete(handle_delete_filter),
        )
        .route("/api/metadata", get(handle_metadata))
        .route("/api/clusters", get(handle_clusters))
        .route("/api/clientes", get(handle_clientes))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/completions", post(handle_completions))
        .route("/api/chat/stream", post(handle_completions_stream))
        .route("/api/wizard", post(handle_wizard_create))
        .route("/api/wizard/{sid}/step/{n}", get(handle_wizard_step))
        .route("/api/wizard/{sid}/files", post(handle_wizard_files))
        .route("/api/wizard/{sid}/tools", post(handle_wizard_tools))
        .route("/api/wizard/{sid}/advance", post(handle_wizard_advance))
        .route("/api/wizard/{sid}/back", post(handle_wizard_back))
        .route("/api/wizard/{sid}/submit", post(handle_wizard_submit))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Any handler failure, rendered as the JSON error contract.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn upstream(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_GATEWAY, "upstream", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::NotFound(_) => not_found(message),
            RegistryError::Unauthorized(_) => {
                AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
            }
            RegistryError::Timeout(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RegistryError::Upstream { .. }
            | RegistryError::Transport(_)
            | RegistryError::Decode(_) => upstream(message),
        }
    }
}

impl From<WizardError> for AppError {
    fn from(e: WizardError) -> Self {
        match e {
            WizardError::Corrupt(_) => internal(e.to_string()),
            other => bad_request(other.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        bad_request(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<ValidationError>() {
            Some(v) => bad_request(v.to_string()),
            None => internal(format!("{:#}", e)),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    /// JSON: filter groups, a flat rule list, or a key/value map.
    filter: Option<String>,
    cliente: Option<String>,
}

#[derive(Serialize)]
struct DocumentList {
    total: usize,
    documents: Vec<Document>,
}

/// Every document, narrowed to `cliente` (exact, case-insensitive) when given.
async fn documents_for(state: &AppState, cliente: Option<&str>) -> Result<Vec<Document>, AppError> {
    let docs = state.registry.list_documents(None).await?;
    Ok(match cliente.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => test_rules(
            &docs,
            &[FilterRule::new("cliente", FilterOperator::Equals, c)],
        ),
        None => docs,
    })
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(q): Query<DocumentsQuery>,
) -> Result<Json<DocumentList>, AppError> {
    let filter: Option<DocumentFilter> = match q.filter.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            serde_json::from_str(raw).map_err(|e| bad_request(format!("invalid filter: {}", e)))?,
        ),
        _ => None,
    };

    let docs = documents_for(&state, q.cliente.as_deref()).await?;
    let documents = match filter {
        Some(f) => f.apply(&docs),
        None => docs,
    };
    Ok(Json(DocumentList {
        total: documents.len(),
        documents,
    }))
}

#[derive(Deserialize)]
struct CreateDocumentRequest {
    #[serde(default)]
    name: Option<String>,
    /// JSON text or an already-parsed object/array.
    content: Value,
    #[serde(default)]
    metadata: Metadata,
}

async fn handle_create_document(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let text = match &req.content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let check = validate_content(&text)?;
    let name = match req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => ensure_json_suffix(n),
        None => check.suggested_name,
    };
    let doc = state
        .registry
        .upload_raw(&name, check.value, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.registry.get_document(&id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.registry.delete_document(&id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Deserialize)]
struct PatchDocumentRequest {
    metadata: Metadata,
}

async fn handle_patch_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchDocumentRequest>,
) -> Result<Json<Document>, AppError> {
    if req.metadata.is_empty() {
        return Err(bad_request("metadata must not be empty"));
    }
    Ok(Json(state.registry.patch_metadata(&id, &req.metadata).await?))
}

async fn handle_document_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.registry.get_content(&id).await?))
}

#[derive(Deserialize)]
struct UploadFile {
    name: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    data_base64: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn decode_files(files: Vec<UploadFile>) -> Result<Vec<WizardFile>, AppError> {
    files
        .into_iter()
        .map(|f| {
            let data = base64::engine::general_purpose::STANDARD
                .decode(f.data_base64.trim())
                .map_err(|e| bad_request(format!("{}: invalid base64: {}", f.name, e)))?;
            Ok(WizardFile::new(&f.name, &f.content_type, data))
        })
        .collect()
}

#[derive(Deserialize)]
struct BatchUploadRequest {
    cliente: String,
    ferramenta: String,
    #[serde(default)]
    tipo: String,
    files: Vec<UploadFile>,
}

#[derive(Serialize)]
struct BatchUploadResponse {
    succeeded: bool,
    #[serde(flatten)]
    report: SubmitReport,
}

/// One-shot wizard: every file goes under one tool and is submitted.
async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<BatchUploadRequest>,
) -> Result<Json<BatchUploadResponse>, AppError> {
    let ferramenta = require("ferramenta", &req.ferramenta)?.to_string();
    let files = decode_files(req.files)?;

    let report =
        upload_with_tool(state.registry.as_ref(), &req.cliente, &ferramenta, &req.tipo, files).await?;
    let succeeded = report.succeeded();
    Ok(Json(BatchUploadResponse { succeeded, report }))
}

#[derive(Deserialize)]
struct ValidateRequest {
    content: String,
}

#[derive(Serialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_validate(Json(req): Json<ValidateRequest>) -> Json<ValidateResponse> {
    Json(match validate_content(&req.content) {
        Ok(check) => ValidateResponse {
            valid: true,
            suggested_name: Some(check.suggested_name),
            error: None,
        },
        Err(e) => ValidateResponse {
            valid: false,
            suggested_name: None,
            error: Some(e.to_string()),
        },
    })
}

// ============ Filters ============

#[derive(Deserialize)]
struct ClienteQuery {
    cliente: Option<String>,
}

async fn handle_list_filters(
    State(state): State<AppState>,
    Query(q): Query<ClienteQuery>,
) -> Json<Value> {
    let filters = state.filters.list(q.cliente.as_deref());
    Json(json!({ "filters": filters }))
}

async fn handle_create_filter(
    State(state): State<AppState>,
    Json(req): Json<NewFilterSet>,
) -> Result<impl IntoResponse, AppError> {
    let set = state.filters.create(req)?;
    Ok((StatusCode::CREATED, Json(set)))
}

async fn handle_get_filter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .filters
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("filter set not found: {}", id)))
}

async fn handle_patch_filter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<FilterSetPatch>,
) -> Result<impl IntoResponse, AppError> {
    state
        .filters
        .patch(&id, patch)?
        .map(Json)
        .ok_or_else(|| not_found(format!("filter set not found: {}", id)))
}

async fn handle_delete_filter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if state.filters.delete(&id)? {
        Ok(Json(json!({ "deleted": id })))
    } else {
        Err(not_found(format!("filter set not found: {}", id)))
    }
}

#[derive(Deserialize)]
struct FilterTestRequest {
    #[serde(default)]
    cliente: Option<String>,
    rules: Vec<FilterRule>,
}

#[derive(Serialize)]
struct FilterTestResponse {
    total: usize,
    matched: usize,
    documents: Vec<Document>,
}

/// Rule-editor test run: rules are ANDed and fail on absent fields.
async fn handle_test_filter(
    State(state): State<AppState>,
    Json(req): Json<FilterTestRequest>,
) -> Result<Json<FilterTestResponse>, AppError> {
    let docs = documents_for(&state, req.cliente.as_deref()).await?;
    let documents = test_rules(&docs, &req.rules);
    Ok(Json(FilterTestResponse {
        total: docs.len(),
        matched: documents.len(),
        documents,
    }))
}

// ============ Metadata ============

async fn handle_metadata(
    State(state): State<AppState>,
    Query(q): Query<ClienteQuery>,
) -> Result<Json<Value>, AppError> {
    let docs = documents_for(&state, q.cliente.as_deref()).await?;
    let index = extract_all_values(&docs, &state.config.metadata.default_keys);
    Ok(Json(json!({ "metadata": index })))
}

#[derive(Serialize)]
struct ClusterView {
    key: String,
    label: String,
    description: String,
    priority: i32,
    values: Vec<String>,
}

async fn handle_clusters(
    State(state): State<AppState>,
    Query(q): Query<ClienteQuery>,
) -> Result<Json<Value>, AppError> {
    let docs = documents_for(&state, q.cliente.as_deref()).await?;
    let mut index = extract_values(&docs, &state.clusters);
    let clusters: Vec<ClusterView> = state
        .clusters
        .iter()
        .map(|c| ClusterView {
            key: c.key.clone(),
            label: c.label.clone(),
            description: c.description.clone(),
            priority: c.priority,
            values: index.remove(&c.key).unwrap_or_default(),
        })
        .collect();
    Ok(Json(json!({ "clusters": clusters })))
}

async fn handle_clientes(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let docs = state.registry.list_documents(None).await?;
    Ok(Json(json!({ "clientes": distinct_values(&docs, "cliente") })))
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    reply: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    require("message", &req.message)?;
    let (session_id, mut session) = state.chats.checkout(req.session_id.as_deref());
    let reply = state.dispatcher.dispatch(&mut session, &req.message).await;
    state.chats.checkin(session_id.clone(), session);
    Ok(Json(ChatResponse { session_id, reply }))
}

#[derive(Deserialize)]
struct CompletionRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    system: Option<String>,
}

async fn handle_completions(
    State(state): State<AppState>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<Value>, AppError> {
    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }
    let system = req
        .system
        .as_deref()
        .or(state.config.llm.system_prompt.as_deref());
    let reply = state
        .provider
        .complete(system, &req.messages)
        .await
        .map_err(|e| provider_error(&state, e))?;
    Ok(Json(json!({
        "reply": reply,
        "provider": state.provider.name(),
        "model": state.provider.model(),
    })))
}

async fn handle_completions_stream(
    State(state): State<AppState>,
    Json(req): Json<CompletionRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }
    let system = req
        .system
        .as_deref()
        .or(state.config.llm.system_prompt.as_deref());
    let mut chunks = state
        .provider
        .stream(system, &req.messages)
        .await
        .map_err(|e| provider_error(&state, e))?;
    let provider = state.provider.name().to_string();
    let model = state.provider.model().to_string();

    let stream = async_stream::stream! {
        let mut count = 0usize;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(text) => {
                    count += 1;
                    yield Ok(Event::default()
                        .event("chunk")
                        .data(json!({ "text": text }).to_string()));
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(provider = %provider, error = %message, "completion stream failed");
                    yield Ok(Event::default().event("error").data(
                        json!({ "error": { "code": "upstream", "message": message } }).to_string(),
                    ));
                    return;
                }
            }
        }
        yield Ok(Event::default().event("done").data(
            json!({ "provider": provider, "model": model, "chunks": count }).to_string(),
        ));
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn provider_error(state: &AppState, e: anyhow::Error) -> AppError {
    if state.provider.name() == "disabled" {
        bad_request(e.to_string())
    } else {
        upstream(format!("{:#}", e))
    }
}

// ============ Wizard ============

#[derive(Serialize)]
struct WizardResponse {
    navigation: Navigation,
    #[serde(skip_serializing_if = "Option::is_none")]
    wizard: Option<WizardView>,
    /// Multi-tool flow: number of the tool to create next.
    #[serde(skip_serializing_if = "Option::is_none")]
    next_tool: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<SubmitReport>,
}

impl WizardResponse {
    fn redirect() -> Self {
        Self {
            navigation: Navigation::Redirect(Step::CollectFiles),
            wizard: None,
            next_tool: None,
            report: None,
        }
    }

    fn render(sid: &str, wizard: &UploadWizard) -> Self {
        Self {
            navigation: Navigation::Render(wizard.step()),
            wizard: wizard.batch().map(|_| WizardView::of(sid, wizard)),
            next_tool: None,
            report: None,
        }
    }
}

/// Restores, applies `op`, saves. Nothing is saved when `op` fails.
fn apply<F>(state: &AppState, sid: &str, op: F) -> Result<Json<WizardResponse>, AppError>
where
    F: FnOnce(&mut UploadWizard) -> Result<Option<usize>, WizardError>,
{
    let mut wizard = match state.wizards.restore(sid) {
        Restored::Wizard(w) => w,
        Restored::Missing => return Ok(Json(WizardResponse::redirect())),
    };
    let next_tool = op(&mut wizard)?;
    state.wizards.save(sid, &wizard)?;
    let mut resp = WizardResponse::render(sid, &wizard);
    resp.next_tool = next_tool;
    Ok(Json(resp))
}

#[derive(Deserialize, Default)]
struct CreateWizardRequest {
    #[serde(default)]
    variant: WizardVariant,
}

async fn handle_wizard_create(
    State(state): State<AppState>,
    Json(req): Json<CreateWizardRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let sid = state.wizards.create(req.variant)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "session_id": sid, "step": Step::CollectFiles })),
    ))
}

async fn handle_wizard_step(
    State(state): State<AppState>,
    Path((sid, n)): Path<(String, u8)>,
) -> Result<Json<WizardResponse>, AppError> {
    let step = Step::from_number(n).ok_or_else(|| bad_request(format!("no wizard step {}", n)))?;
    let (navigation, wizard) = state.wizards.visit(&sid, step);
    Ok(Json(WizardResponse {
        navigation,
        wizard: wizard.map(|w| WizardView::of(&sid, &w)),
        next_tool: None,
        report: None,
    }))
}

#[derive(Deserialize)]
struct WizardFilesRequest {
    #[serde(default)]
    cliente: Option<String>,
    #[serde(default)]
    tipo: Option<String>,
    #[serde(default)]
    add: Vec<UploadFile>,
    #[serde(default)]
    remove: Vec<String>,
    /// Move on to tool association after applying the changes.
    #[serde(default)]
    proceed: bool,
}

async fn handle_wizard_files(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(req): Json<WizardFilesRequest>,
) -> Result<Json<WizardResponse>, AppError> {
    let added = decode_files(req.add)?;
    apply(&state, &sid, |w| {
        if let Some(c) = &req.cliente {
            w.set_client(c)?;
        }
        if let Some(t) = &req.tipo {
            w.set_tipo(t)?;
        }
        for name in &req.remove {
            w.remove_file(name)?;
        }
        for f in added {
            w.add_file(f)?;
        }
        if req.proceed {
            w.proceed_to_tools()?;
        }
        Ok(None)
    })
}

#[derive(Deserialize)]
struct Assignment {
    file: String,
    tool: String,
}

#[derive(Deserialize)]
struct SearchTerm {
    tool: String,
    term: String,
}

#[derive(Deserialize)]
struct WizardToolsRequest {
    #[serde(default)]
    create: Option<String>,
    #[serde(default)]
    assign: Vec<Assignment>,
    #[serde(default)]
    unassign: Vec<String>,
    #[serde(default)]
    search: Option<SearchTerm>,
    #[serde(default)]
    toggle: Option<String>,
}

async fn handle_wizard_tools(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(req): Json<WizardToolsRequest>,
) -> Result<Json<WizardResponse>, AppError> {
    apply(&state, &sid, |w| {
        if let Some(name) = &req.create {
            w.create_tool(name)?;
        }
        for a in &req.assign {
            w.assign(&a.file, &a.tool)?;
        }
        for file in &req.unassign {
            w.unassign(file)?;
        }
        if let Some(s) = &req.search {
            w.set_search_term(&s.tool, &s.term)?;
        }
        if let Some(tool) = &req.toggle {
            w.toggle_expanded(tool)?;
        }
        Ok(None)
    })
}

async fn handle_wizard_advance(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<WizardResponse>, AppError> {
    apply(&state, &sid, |w| {
        Ok(match w.advance()? {
            Advance::Review => None,
            Advance::NextTool(n) => Some(n),
        })
    })
}

async fn handle_wizard_back(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<WizardResponse>, AppError> {
    apply(&state, &sid, |w| w.back().map(|_| None))
}

/// Review → Submit → Complete, or back to Review when any upload failed.
async fn handle_wizard_submit(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<WizardResponse>, AppError> {
    let mut wizard = match state.wizards.restore(&sid) {
        Restored::Wizard(w) => w,
        Restored::Missing => return Ok(Json(WizardResponse::redirect())),
    };
    let requests = wizard.begin_submit()?;
    state.wizards.save(&sid, &wizard)?;

    let report = submit_batch(state.registry.as_ref(), requests).await;
    let completed = wizard.finish(report.clone())?;
    state.wizards.save(&sid, &wizard)?;
    if completed {
        tracing::info!(session = %sid, files = report.outcomes.len(), "wizard completed");
    }

    let mut resp = WizardResponse::render(&sid, &wizard);
    resp.report = Some(report);
    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_status_mapping() {
        let cases = [
            (RegistryError::NotFound("x".into()), StatusCode::NOT_FOUND, "not_found"),
            (RegistryError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "unauthorized"),
            (RegistryError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT, "timeout"),
            (
                RegistryError::Upstream {
                    status: 500,
                    message: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
                "upstream",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_validation_inside_anyhow_is_bad_request() {
        let e: anyhow::Error = ValidationError::RequiredField("cliente").into();
        let app: AppError = e.into();
        assert_eq!(app.status, StatusCode::BAD_REQUEST);
    }
}
