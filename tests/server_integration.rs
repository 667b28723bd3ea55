//! HTTP API tests against an in-memory registry.
//!
//! Each test starts its own server on a free port via
//! [`server::run_server_with`] and drives it with reqwest.

use axum::{http::header, response::IntoResponse, routing::post, Json, Router};
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;

use ragdesk::config::{Config, LlmConfig};
use ragdesk::llm::{ChatProvider, DisabledProvider, GroqProvider};
use ragdesk::server;
use ragdesk_core::registry::memory::InMemoryRegistry;
use ragdesk_core::{Document, Metadata};

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn seed_documents() -> Vec<Document> {
    vec![
        Document::new(
            "a1",
            "manual-acme.pdf",
            Metadata::new()
                .with("cliente", "Acme")
                .with("Ferramenta", "Zendesk")
                .with("tipo", "manual"),
        ),
        Document::new(
            "a2",
            "faq-acme.pdf",
            Metadata::new()
                .with("cliente", "Acme")
                .with("Ferramenta", "Jira")
                .with("tipo", "faq"),
        ),
        Document::new(
            "b1",
            "beta.pdf",
            Metadata::new()
                .with("cliente", "Beta")
                .with("tags", vec!["urgente".to_string(), "rh".to_string()]),
        ),
    ]
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    registry: Arc<InMemoryRegistry>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(Arc::new(DisabledProvider)).await
    }

    async fn start_with(provider: Arc<dyn ChatProvider>) -> Self {
        let port = find_free_port();
        let mut cfg = Config::minimal();
        cfg.server.bind = format!("127.0.0.1:{}", port);

        let registry = Arc::new(InMemoryRegistry::with_documents(seed_documents()));
        let reg = registry.clone();
        let handle = tokio::spawn(async move {
            server::run_server_with(&cfg, reg, provider)
                .await
                .unwrap();
        });
        wait_for_server(port).await;

        Self {
            base: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
            registry,
            handle,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn patch(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .patch(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .delete(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn b64(data: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn ids(body: &Value) -> Vec<String> {
    body["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect()
}

// ─── Documents ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let srv = TestServer::start().await;
    let (status, body) = srv.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_documents_with_filters() {
    let srv = TestServer::start().await;

    let (status, body) = srv.get("/api/documents").await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 3);

    let (_, body) = srv.get("/api/documents?cliente=acme").await;
    assert_eq!(ids(&body), vec!["a1", "a2"]);

    // Group filter: OR inside the group.
    let groups = json!([{
        "operator": "OR",
        "rules": [
            {"campo": "tipo", "operador": "equals", "valor": "FAQ"},
            {"campo": "tags", "operador": "contains", "valor": "urg"}
        ]
    }]);
    let url = format!(
        "/api/documents?filter={}",
        urlencode(&groups.to_string())
    );
    let (status, body) = srv.get(&url).await;
    assert_eq!(status, 200);
    assert_eq!(ids(&body), vec!["a2", "b1"]);

    // Value map: substring per key.
    let url = format!(
        "/api/documents?filter={}",
        urlencode(&json!({"Ferramenta": "zen"}).to_string())
    );
    let (_, body) = srv.get(&url).await;
    assert_eq!(ids(&body), vec!["a1"]);
}

#[tokio::test]
async fn test_invalid_filter_is_bad_request() {
    let srv = TestServer::start().await;
    let (status, body) = srv.get("/api/documents?filter=not-json").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_document_crud() {
    let srv = TestServer::start().await;

    let (status, doc) = srv
        .post(
            "/api/documents",
            json!({
                "name": "politica",
                "content": "{\"title\": \"Politica de ferias\"}",
                "metadata": {"cliente": "Acme"}
            }),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(doc["name"], "politica.json");
    let id = doc["id"].as_str().unwrap().to_string();

    let (status, content) = srv.get(&format!("/api/documents/{}/content", id)).await;
    assert_eq!(status, 200);
    assert_eq!(content["title"], "Politica de ferias");

    let (status, patched) = srv
        .patch(
            &format!("/api/documents/{}", id),
            json!({"metadata": {"tipo": "politica"}}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(patched["metadata"]["tipo"], "politica");
    assert_eq!(patched["metadata"]["cliente"], "Acme");

    let (status, _) = srv.delete(&format!("/api/documents/{}", id)).await;
    assert_eq!(status, 200);

    let (status, body) = srv.get(&format!("/api/documents/{}", id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_create_document_rejects_scalar_json() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post("/api/documents", json!({"content": "42"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(srv.registry.len(), 3);
}

#[tokio::test]
async fn test_validate_endpoint() {
    let srv = TestServer::start().await;

    let (status, body) = srv
        .post("/api/documents/validate", json!({"content": "{\"title\": \"Guia\"}"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["valid"], true);
    assert!(body["suggested_name"].as_str().unwrap().ends_with(".json"));

    let (status, body) = srv
        .post("/api/documents/validate", json!({"content": "[]"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["valid"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_batch_upload_reports_each_file() {
    let srv = TestServer::start().await;
    srv.registry.fail_uploads_named("bad.txt");

    let (status, body) = srv
        .post(
            "/api/documents/upload",
            json!({
                "cliente": "Acme",
                "ferramenta": "Zendesk",
                "files": [
                    {"name": "good.txt", "content_type": "text/plain", "data_base64": b64("ok")},
                    {"name": "bad.txt", "content_type": "text/plain", "data_base64": b64("no")}
                ]
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["succeeded"], false);

    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    let good = outcomes.iter().find(|o| o["file"] == "good.txt").unwrap();
    assert!(good["document_id"].is_string());
    let bad = outcomes.iter().find(|o| o["file"] == "bad.txt").unwrap();
    assert!(bad["error"].is_string());

    // The successful upload is kept and tagged.
    assert_eq!(srv.registry.len(), 4);
    let (_, body) = srv.get("/api/documents?cliente=acme").await;
    let uploaded = body["documents"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["name"] == "good.txt")
        .cloned()
        .unwrap();
    assert_eq!(uploaded["metadata"]["Ferramenta"], "Zendesk");
    assert_eq!(uploaded["metadata"]["tipo"], "documento");
}

#[tokio::test]
async fn test_batch_upload_requires_ferramenta() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/api/documents/upload",
            json!({"cliente": "Acme", "ferramenta": " ", "files": []}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

// ─── Metadata ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_metadata_clusters_and_clientes() {
    let srv = TestServer::start().await;

    let (status, body) = srv.get("/api/clientes").await;
    assert_eq!(status, 200);
    assert_eq!(body["clientes"], json!(["Acme", "Beta"]));

    let (_, body) = srv.get("/api/metadata").await;
    assert_eq!(body["metadata"]["tags"], json!(["rh", "urgente"]));
    assert_eq!(body["metadata"]["tipo"], json!(["faq", "manual"]));
    // Client ids are listed separately.
    assert!(body["metadata"].get("cliente").is_none());

    let (_, body) = srv.get("/api/metadata?cliente=Beta").await;
    assert!(body["metadata"].get("tipo").is_none());
    assert_eq!(body["metadata"]["document_type"], json!([]));

    let (_, body) = srv.get("/api/clusters").await;
    let clusters = body["clusters"].as_array().unwrap();
    let ferramenta = clusters.iter().find(|c| c["key"] == "Ferramenta").unwrap();
    assert_eq!(ferramenta["values"], json!(["Jira", "Zendesk"]));
    let priorities: Vec<i64> = clusters
        .iter()
        .map(|c| c["priority"].as_i64().unwrap())
        .collect();
    let mut sorted = priorities.clone();
    sorted.sort();
    assert_eq!(priorities, sorted);
}

// ─── Filter sets ────────────────────────────────────────────────────

#[tokio::test]
async fn test_filter_set_crud_and_test_run() {
    let srv = TestServer::start().await;

    let (status, set) = srv
        .post(
            "/api/filters",
            json!({
                "cliente": "Acme",
                "name": "Manuais",
                "groups": [{"operator": "AND", "rules": [
                    {"campo": "tipo", "operador": "equals", "valor": "manual"}
                ]}]
            }),
        )
        .await;
    assert_eq!(status, 201);
    let id = set["id"].as_str().unwrap().to_string();

    let (_, body) = srv.get("/api/filters?cliente=acme").await;
    assert_eq!(body["filters"].as_array().unwrap().len(), 1);
    let (_, body) = srv.get("/api/filters?cliente=Beta").await;
    assert!(body["filters"].as_array().unwrap().is_empty());

    let (status, patched) = srv
        .patch(&format!("/api/filters/{}", id), json!({"name": "Manuais v2"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(patched["name"], "Manuais v2");

    let (status, _) = srv.delete(&format!("/api/filters/{}", id)).await;
    assert_eq!(status, 200);
    let (status, body) = srv.get(&format!("/api/filters/{}", id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    // Absent fields fail the rule in test runs.
    let (status, body) = srv
        .post(
            "/api/filters/test",
            json!({"rules": [{"campo": "tipo", "operador": "is_empty"}]}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 3);
    assert_eq!(body["matched"], 0);

    let (_, body) = srv
        .post(
            "/api/filters/test",
            json!({"cliente": "acme", "rules": [{"campo": "Ferramenta", "operador": "starts_with", "valor": "ji"}]}),
        )
        .await;
    assert_eq!(body["total"], 2);
    assert_eq!(ids(&body), vec!["a2"]);
}

#[tokio::test]
async fn test_filter_set_requires_name() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post("/api/filters", json!({"cliente": "Acme", "name": ""}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

// ─── Wizard ─────────────────────────────────────────────────────────

async fn start_wizard(srv: &TestServer, variant: &str) -> String {
    let (status, body) = srv.post("/api/wizard", json!({"variant": variant})).await;
    assert_eq!(status, 201);
    assert_eq!(body["step"], 1);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_wizard_single_tool_flow() {
    let srv = TestServer::start().await;
    let sid = start_wizard(&srv, "single_tool").await;

    // Later steps redirect until their state exists.
    let (_, body) = srv.get(&format!("/api/wizard/{}/step/3", sid)).await;
    assert_eq!(body["navigation"], json!({"action": "redirect", "step": 1}));

    let (status, body) = srv
        .post(
            &format!("/api/wizard/{}/files", sid),
            json!({
                "cliente": "Acme",
                "tipo": "manual",
                "add": [
                    {"name": "a.txt", "content_type": "text/plain", "data_base64": b64("alpha")},
                    {"name": "b.txt", "content_type": "text/plain", "data_base64": b64("beta")}
                ],
                "proceed": true
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["navigation"], json!({"action": "render", "step": 2}));
    assert_eq!(body["wizard"]["unassigned"], json!(["a.txt", "b.txt"]));

    let (status, body) = srv
        .post(
            &format!("/api/wizard/{}/tools", sid),
            json!({"create": "Zendesk", "assign": [{"file": "a.txt", "tool": "Zendesk"}]}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["wizard"]["unassigned"], json!(["b.txt"]));

    // A second tool is refused and nothing is saved.
    let (status, _) = srv
        .post(&format!("/api/wizard/{}/tools", sid), json!({"create": "Jira"}))
        .await;
    assert_eq!(status, 400);

    let (status, body) = srv
        .post(&format!("/api/wizard/{}/advance", sid), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["navigation"], json!({"action": "render", "step": 3}));
    let plan = body["wizard"]["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0]["metadata"]["Ferramenta"], "Zendesk");
    assert_eq!(plan[0]["metadata"]["tipo"], "manual");

    let (_, body) = srv.get(&format!("/api/wizard/{}/step/3", sid)).await;
    assert_eq!(body["navigation"], json!({"action": "render", "step": 3}));

    let (status, body) = srv
        .post(&format!("/api/wizard/{}/submit", sid), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["navigation"], json!({"action": "render", "step": 5}));
    assert!(body["report"]["outcomes"][0]["document_id"].is_string());
    assert_eq!(srv.registry.len(), 4);

    // A completed wizard clears its session.
    let (_, body) = srv.get(&format!("/api/wizard/{}/step/2", sid)).await;
    assert_eq!(body["navigation"], json!({"action": "redirect", "step": 1}));
}

#[tokio::test]
async fn test_wizard_multi_tool_asks_for_next_tool() {
    let srv = TestServer::start().await;
    let sid = start_wizard(&srv, "multi_tool").await;

    srv.post(
        &format!("/api/wizard/{}/files", sid),
        json!({
            "cliente": "Acme",
            "add": [
                {"name": "a.txt", "data_base64": b64("a")},
                {"name": "b.txt", "data_base64": b64("b")}
            ],
            "proceed": true
        }),
    )
    .await;
    srv.post(
        &format!("/api/wizard/{}/tools", sid),
        json!({"create": "Zendesk", "assign": [{"file": "a.txt", "tool": "Zendesk"}]}),
    )
    .await;

    let (_, body) = srv
        .post(&format!("/api/wizard/{}/advance", sid), json!({}))
        .await;
    assert_eq!(body["navigation"], json!({"action": "render", "step": 2}));
    assert_eq!(body["next_tool"], 2);

    srv.post(
        &format!("/api/wizard/{}/tools", sid),
        json!({"create": "Jira", "assign": [{"file": "b.txt", "tool": "Jira"}]}),
    )
    .await;
    let (_, body) = srv
        .post(&format!("/api/wizard/{}/advance", sid), json!({}))
        .await;
    assert_eq!(body["navigation"], json!({"action": "render", "step": 3}));
    assert_eq!(body["wizard"]["plan"].as_array().unwrap().len(), 2);

    let (_, body) = srv
        .post(&format!("/api/wizard/{}/back", sid), json!({}))
        .await;
    assert_eq!(body["navigation"], json!({"action": "render", "step": 2}));
}

#[tokio::test]
async fn test_wizard_failed_submit_returns_to_review() {
    let srv = TestServer::start().await;
    srv.registry.fail_uploads_named("bad.txt");
    let sid = start_wizard(&srv, "single_tool").await;

    srv.post(
        &format!("/api/wizard/{}/files", sid),
        json!({
            "cliente": "Acme",
            "add": [
                {"name": "ok.txt", "data_base64": b64("ok")},
                {"name": "bad.txt", "data_base64": b64("bad")}
            ],
            "proceed": true
        }),
    )
    .await;
    srv.post(
        &format!("/api/wizard/{}/tools", sid),
        json!({"create": "Zendesk", "assign": [
            {"file": "ok.txt", "tool": "Zendesk"},
            {"file": "bad.txt", "tool": "Zendesk"}
        ]}),
    )
    .await;
    srv.post(&format!("/api/wizard/{}/advance", sid), json!({}))
        .await;

    let (status, body) = srv
        .post(&format!("/api/wizard/{}/submit", sid), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["navigation"], json!({"action": "render", "step": 3}));
    let failed: Vec<&str> = body["report"]["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|o| o["error"].is_string())
        .map(|o| o["file"].as_str().unwrap())
        .collect();
    assert_eq!(failed, vec!["bad.txt"]);
    // No rollback of the upload that succeeded.
    assert_eq!(srv.registry.len(), 4);

    let (_, body) = srv.get(&format!("/api/wizard/{}/step/3", sid)).await;
    assert_eq!(body["navigation"], json!({"action": "render", "step": 3}));
}

#[tokio::test]
async fn test_wizard_errors_and_unknown_sessions() {
    let srv = TestServer::start().await;

    let (status, body) = srv
        .post("/api/wizard/unknown/advance", json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["navigation"], json!({"action": "redirect", "step": 1}));

    let sid = start_wizard(&srv, "single_tool").await;
    let (status, body) = srv
        .post(&format!("/api/wizard/{}/files", sid), json!({"proceed": true}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = srv.get(&format!("/api/wizard/{}/step/9", sid)).await;
    assert_eq!(status, 400);
}

// ─── Chat ───────────────────────────────────────────────────────────

async fn chat(srv: &TestServer, session: Option<&str>, message: &str) -> (String, String) {
    let (status, body) = srv
        .post(
            "/api/chat",
            json!({"session_id": session, "message": message}),
        )
        .await;
    assert_eq!(status, 200, "chat failed: {}", body);
    (
        body["session_id"].as_str().unwrap().to_string(),
        body["reply"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_chat_commands() {
    let srv = TestServer::start().await;

    let (_, reply) = chat(&srv, None, "/docs").await;
    assert!(reply.contains("manual-acme.pdf (a1)"), "{}", reply);

    let (_, reply) = chat(
        &srv,
        None,
        r#"/upload-raw suporte {"title": "Reset de senha", "body": "passos para resetar"}"#,
    )
    .await;
    assert!(reply.starts_with("Uploaded"), "{}", reply);

    let (_, reply) = chat(&srv, None, "/search suporte resetar").await;
    assert!(reply.contains("Results for"), "{}", reply);

    let (_, reply) = chat(&srv, None, "/search outro resetar").await;
    assert!(reply.starts_with("No results"), "{}", reply);

    let (_, reply) = chat(&srv, None, "/search").await;
    assert!(reply.starts_with("Usage:"), "{}", reply);

    let (_, reply) = chat(&srv, None, "/nope").await;
    assert!(reply.contains("Command not recognized: /nope"), "{}", reply);

    // No provider configured.
    let (_, reply) = chat(&srv, None, "hello").await;
    assert!(reply.starts_with("Error:"), "{}", reply);
}

#[tokio::test]
async fn test_chat_upload_flow_keeps_session() {
    let srv = TestServer::start().await;

    let (sid, _) = chat(&srv, None, "/upload").await;
    let (same, _) = chat(&srv, Some(&sid), r#"{"title": "Guia"}"#).await;
    assert_eq!(same, sid);

    let (_, reply) = chat(&srv, Some(&sid), "/cancel").await;
    assert_eq!(reply, "Upload cancelled.");
    let (_, reply) = chat(&srv, Some(&sid), "/cancel").await;
    assert_eq!(reply, "Nothing to cancel.");
    assert_eq!(srv.registry.len(), 3);
}

#[tokio::test]
async fn test_chat_rejects_blank_message() {
    let srv = TestServer::start().await;
    let (status, body) = srv.post("/api/chat", json!({"message": "  "})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_completions_without_provider() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/api/chat/completions",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = srv
        .post("/api/chat/completions", json!({"messages": []}))
        .await;
    assert_eq!(status, 400);
}

// ─── Streaming ──────────────────────────────────────────────────────

/// Groq-style event stream. A last user message of `"fail"` breaks the
/// stream after the first chunk.
async fn groq_stub(Json(body): Json<Value>) -> impl IntoResponse {
    assert_eq!(body["stream"], true);
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    let delta = |text: &str| {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": text}}]})
        )
    };
    let mut out = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    if last == "fail" {
        out.push_str(&delta("partial"));
        out.push_str("data: {not json\n\n");
    } else {
        for text in ["Olá", ", Acme", "!"] {
            out.push_str(&delta(text));
        }
        out.push_str("data: [DONE]\n\n");
    }
    ([(header::CONTENT_TYPE, "text/event-stream")], out)
}

async fn start_groq_stub() -> String {
    let app = Router::new().route("/openai/v1/chat/completions", post(groq_stub));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_with_groq() -> TestServer {
    let config = LlmConfig {
        provider: "groq".to_string(),
        model: Some("llama-3.1-8b-instant".to_string()),
        base_url: Some(start_groq_stub().await),
        ..LlmConfig::default()
    };
    let provider = GroqProvider::new(&config, "gsk_0123456789abcdefgh").unwrap();
    TestServer::start_with(Arc::new(provider)).await
}

/// `(event, data)` pairs of an event-stream body.
fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = Some(v.trim().to_string());
                }
            }
            Some((event?, serde_json::from_str(&data?).unwrap()))
        })
        .collect()
}

async fn stream_chat(srv: &TestServer, message: &str) -> (u16, String, String) {
    let resp = srv
        .client
        .post(format!("{}/api/chat/stream", srv.base))
        .json(&json!({"messages": [{"role": "user", "content": message}]}))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (status, content_type, resp.text().await.unwrap())
}

#[tokio::test]
async fn test_stream_delivers_chunks_in_order() {
    let srv = start_with_groq().await;
    let (status, content_type, body) = stream_chat(&srv, "oi").await;
    assert_eq!(status, 200);
    assert!(content_type.starts_with("text/event-stream"), "{}", content_type);

    let events = sse_events(&body);
    let texts: Vec<&str> = events
        .iter()
        .filter(|(e, _)| e == "chunk")
        .map(|(_, d)| d["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["Olá", ", Acme", "!"]);

    let (last, data) = events.last().unwrap();
    assert_eq!(last, "done");
    assert_eq!(data["provider"], "groq");
    assert_eq!(data["chunks"], 3);
}

#[tokio::test]
async fn test_stream_failure_ends_with_error_event() {
    let srv = start_with_groq().await;
    let (status, _, body) = stream_chat(&srv, "fail").await;
    assert_eq!(status, 200);

    let events = sse_events(&body);
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names, vec!["chunk", "error"]);
    assert_eq!(events[0].1["text"], "partial");
    assert_eq!(events[1].1["error"]["code"], "upstream");
    assert!(events[1].1["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Invalid Groq stream chunk"));
}

#[tokio::test]
async fn test_stream_without_provider_is_bad_request() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/api/chat/stream",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = srv.post("/api/chat/stream", json!({"messages": []})).await;
    assert_eq!(status, 400);
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
