//! End-to-end tests: upload documents, run turns over HTTP and check the
//! conversation state the runtime commits.

use std::sync::Arc;

use afina_agent::{ChatRuntime, EngineContext, ModelClient};
use afina_config::{GatewayConfig, LimitsConfig};
use afina_core::error::ProviderError;
use afina_core::event::EventBus;
use afina_core::message::{ConversationId, Message, Role};
use afina_core::provider::{Provider, ProviderRequest, ProviderResponse};
use afina_core::tool::ToolRegistry;
use afina_files::{DefaultExtractor, FileCache, FsDocumentStore};
use afina_gateway::{ApiState, build_router};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

// ── Mock providers ──────────────────────────────────────────────────────

fn last_user(request: &ProviderRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn reply(content: &str) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant(content),
        usage: None,
        model: "e2e-mock".into(),
    })
}

/// Classifies by keyword and confirms anything starting with "да".
struct RouterMock;

#[async_trait::async_trait]
impl Provider for RouterMock {
    fn name(&self) -> &str {
        "router_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let text = last_user(&request).to_lowercase();
        if text.starts_with("да") {
            return reply(r#"{"yes": true}"#);
        }
        let intent = if text.contains("проанализируй") {
            "ANALYZE"
        } else if text.contains("отчёт") {
            "ASK_PREV_REPORT"
        } else {
            "GENERAL"
        };
        reply(&format!(r#"{{"intent": "{intent}"}}"#))
    }
}

/// Writes a report that records whether the document text reached it.
struct AnalystMock;

#[async_trait::async_trait]
impl Provider for AnalystMock {
    fn name(&self) -> &str {
        "analyst_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let prompt = last_user(&request);
        let verdict = if prompt.contains("ROC AUC 0.81") { "Yes" } else { "No" };
        reply(&format!(
            "| Criterion | Yes/No | Explanation | Where in the documents |\n\
             |---|---|---|---|\n\
             | Quality metrics | {verdict} | AUC reported | card.md |"
        ))
    }
}

/// Answers follow-ups from the report excerpt, everything else generically.
struct AssistantMock;

#[async_trait::async_trait]
impl Provider for AssistantMock {
    fn name(&self) -> &str {
        "assistant_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let prompt = last_user(&request);
        if prompt.contains("Report excerpt:") && prompt.contains("Quality metrics | Yes") {
            reply("Metrics are covered")
        } else {
            reply("Hello from Afina")
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct App {
    runtime: Arc<ChatRuntime>,
    router: axum::Router,
    _dir: tempfile::TempDir,
}

fn app() -> App {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsDocumentStore::new(dir.path()));
    let ctx = EngineContext {
        router: ModelClient::new(Arc::new(RouterMock), "router", 0.0),
        assistant: ModelClient::new(Arc::new(AssistantMock), "assistant", 0.0),
        analyst: ModelClient::new(Arc::new(AnalystMock), "analyst", 0.0),
        tools: Arc::new(ToolRegistry::new()),
        files: Arc::new(FileCache::new(store, Arc::new(DefaultExtractor))),
        limits: LimitsConfig::default(),
        event_bus: Arc::new(EventBus::default()),
    };
    let runtime = Arc::new(ChatRuntime::new(ctx));
    let state = Arc::new(ApiState::new(runtime.clone()));
    App {
        runtime,
        router: build_router(state, &GatewayConfig::default()),
        _dir: dir,
    }
}

async fn upload(app: &App, chat: &str, filename: &str, content: &str) {
    let body = format!(
        "--b\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n{chat}\r\n\
         --b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/plain\r\n\r\n{content}\r\n--b--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=b")
        .body(Body::from(body))
        .unwrap();
    let response = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Run a turn and return the decoded SSE frames.
async fn chat(app: &App, chat: &str, message: &str, files: &[&str]) -> Vec<serde_json::Value> {
    let payload = serde_json::json!({ "chat_id": chat, "message": message, "files": files });
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

fn text_of(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .filter_map(|f| f["content"].as_str())
        .collect()
}

fn assert_done(frames: &[serde_json::Value]) {
    let last = frames.last().unwrap();
    assert_eq!(last["done"], true);
    assert!(last.get("error").is_none());
    assert_eq!(frames.iter().filter(|f| f["done"] == true).count(), 1);
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn analysis_then_follow_up_answers_from_report() {
    let app = app();
    upload(&app, "review-1", "card.md", "Model card: ROC AUC 0.81 on holdout").await;

    let frames = chat(&app, "review-1", "Проанализируй документы", &["card.md"]).await;
    assert_done(&frames);
    assert!(text_of(&frames).contains("| Quality metrics | Yes |"));

    let state = app
        .runtime
        .snapshot(&ConversationId::from("review-1"))
        .await
        .unwrap();
    let report = state.last_report.as_ref().unwrap();
    assert_eq!(
        report.source_files.keys().collect::<Vec<_>>(),
        vec!["card.md"]
    );
    assert!(report.source_files["card.md"].contains("ROC AUC 0.81"));
    assert!(report.prompt_snapshot.starts_with("[SYSTEM]"));

    let frames = chat(&app, "review-1", "Что в отчёт попало про метрики?", &["card.md"]).await;
    assert_done(&frames);
    assert_eq!(text_of(&frames), "Metrics are covered");
}

#[tokio::test]
async fn analysis_without_files_explains_what_is_missing() {
    let app = app();

    let frames = chat(&app, "empty", "Проанализируй документы", &[]).await;
    assert_done(&frames);
    assert!(!text_of(&frames).is_empty());

    let state = app
        .runtime
        .snapshot(&ConversationId::from("empty"))
        .await
        .unwrap();
    assert!(state.last_report.is_none());
}

#[tokio::test]
async fn clarification_then_confirmation_runs_analysis() {
    let app = app();
    upload(&app, "review-2", "card.md", "ROC AUC 0.81").await;
    let id = ConversationId::from("review-2");

    let frames = chat(&app, "review-2", "Что было в прошлый раз в отчёт?", &["card.md"]).await;
    assert_done(&frames);
    assert!(app.runtime.snapshot(&id).await.unwrap().clarification_pending);

    let frames = chat(&app, "review-2", "да, запускай", &["card.md"]).await;
    assert_done(&frames);
    assert!(text_of(&frames).contains("| Quality metrics | Yes |"));

    let state = app.runtime.snapshot(&id).await.unwrap();
    assert!(!state.clarification_pending);
    assert!(state.last_report.is_some());
}

#[tokio::test]
async fn general_chat_keeps_history_per_conversation() {
    let app = app();

    let frames = chat(&app, "small-talk", "Привет!", &[]).await;
    assert_done(&frames);
    assert_eq!(text_of(&frames), "Hello from Afina");

    chat(&app, "small-talk", "Как дела?", &[]).await;
    let state = app
        .runtime
        .snapshot(&ConversationId::from("small-talk"))
        .await
        .unwrap();
    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert!(app
        .runtime
        .snapshot(&ConversationId::from("other"))
        .await
        .is_none());
}

#[tokio::test]
async fn deleted_file_is_dropped_from_next_analysis() {
    let app = app();
    upload(&app, "review-3", "card.md", "ROC AUC 0.81").await;
    upload(&app, "review-3", "notes.txt", "draft notes").await;

    chat(&app, "review-3", "Проанализируй", &["card.md", "notes.txt"]).await;

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/files/review-3/card.md")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frames = chat(&app, "review-3", "Проанализируй снова", &["card.md", "notes.txt"]).await;
    assert_done(&frames);
    assert!(text_of(&frames).contains("| Quality metrics | No |"));

    let state = app
        .runtime
        .snapshot(&ConversationId::from("review-3"))
        .await
        .unwrap();
    assert_eq!(state.file_index.keys().collect::<Vec<_>>(), vec!["notes.txt"]);
}
