use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use lexi_core::events::TurnEvent;
use lexi_core::ids::SessionId;
use lexi_engine::{EngineError, TurnOrchestrator};

use crate::error::ServerError;
use crate::framer::frame;

/// Events buffered between a running turn and its SSE response.
const EVENT_BUFFER: usize = 256;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub source_text: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", post(stream_handler))
        .route("/chat", post(chat_handler))
        .route("/extract", post(extract_handler))
        .route("/sessions/{id}/history", get(history_handler))
        .route("/sessions/{id}/documents", get(documents_handler))
        .route("/sessions/{id}", delete(clear_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Port 0 picks a free port.
pub async fn start(config: ServerConfig, orchestrator: Arc<TurnOrchestrator>) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { orchestrator });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(signal.cancelled_owned());
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    info!(host = %config.host, port = local_addr.port(), "LexiDoc server started");
    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not finish cleanly");
        }
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))
}

/// Validate a chat body and pick the session it belongs to.
fn turn_input(request: ChatRequest) -> Result<(SessionId, String), ServerError> {
    if request.message.trim().is_empty() {
        return Err(ServerError::BadRequest("message must not be empty".into()));
    }
    let session_id = match request.session_id.filter(|s| !s.trim().is_empty()) {
        Some(raw) => SessionId::from_raw(raw),
        None => SessionId::new(),
    };
    Ok((session_id, request.message))
}

/// POST /stream
async fn stream_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let (session_id, message) = turn_input(parse_body(body)?)?;
    let session_header = HeaderValue::from_str(session_id.as_str())
        .map_err(|_| ServerError::BadRequest("session_id is not a valid header value".into()))?;

    let (tx, mut rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
    let orchestrator = Arc::clone(&state.orchestrator);
    let turn_session = session_id.clone();
    tokio::spawn(async move {
        // The client going away does not cancel the turn; it still commits.
        let cancel = CancellationToken::new();
        if let Err(e) = orchestrator.run_turn(&turn_session, message, &tx, &cancel).await {
            debug!(session_id = %turn_session, error = %e, "streamed turn ended with error");
        }
    });

    let frames = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            if let Some(frame) = frame(&event) {
                yield Ok::<Bytes, Infallible>(Bytes::from(frame));
            }
            if event.is_terminal() {
                break;
            }
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(SESSION_HEADER, session_header);
    Ok((headers, Body::from_stream(frames)).into_response())
}

/// POST /chat
async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, ServerError> {
    let (session_id, message) = turn_input(parse_body(body)?)?;

    // Non-streaming callers only want the outcome.
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    // Owned by its own task so a dropped request still finishes and commits.
    let orchestrator = Arc::clone(&state.orchestrator);
    let turn_session = session_id.clone();
    let turn_message = message.clone();
    let turn = tokio::spawn(async move {
        orchestrator
            .run_turn(&turn_session, turn_message, &tx, &CancellationToken::new())
            .await
    });
    let outcome = turn
        .await
        .map_err(|e| EngineError::Internal(format!("turn task failed: {e}")))??;

    Ok(Json(json!({
        "response": outcome.text,
        "message_received": message,
        "session_id": session_id,
        "rounds": outcome.rounds,
        "artifacts": outcome.artifacts,
    })))
}

/// POST /extract
async fn extract_handler(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<Value>, ServerError> {
    let request = parse_body(body)?;
    if request.source_text.trim().is_empty() {
        return Err(ServerError::BadRequest("source_text must not be empty".into()));
    }
    if request.fields.is_empty() {
        return Err(ServerError::BadRequest("fields must not be empty".into()));
    }
    let extracted = state
        .orchestrator
        .extract(&request.source_text, &request.fields)
        .await?;
    Ok(Json(extracted))
}

/// GET /sessions/{id}/history
async fn history_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let session_id = SessionId::from_raw(id);
    let messages = state.orchestrator.history().snapshot(&session_id);
    Json(json!({ "session_id": session_id, "messages": messages }))
}

/// GET /sessions/{id}/documents
async fn documents_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let session_id = SessionId::from_raw(id);
    let documents = state.orchestrator.documents();
    let versions = documents.versions(&session_id);
    let latest_version = documents.latest(&session_id).map(|v| v.version);
    Json(json!({
        "session_id": session_id,
        "versions": versions,
        "latest_version": latest_version,
    }))
}

/// DELETE /sessions/{id}
async fn clear_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let session_id = SessionId::from_raw(id);
    let cleared = state.orchestrator.clear_session(&session_id).await;
    Json(json!({
        "session_id": session_id,
        "cleared_history": cleared.history,
        "cleared_documents": cleared.documents,
    }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "sessions": state.orchestrator.history().session_count(),
        "model": state.orchestrator.model(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use tower::ServiceExt;

    use lexi_core::errors::GatewayError;
    use lexi_engine::tools::create_default_registry;
    use lexi_engine::EngineConfig;
    use lexi_llm::mock::{MockProvider, MockResponse};
    use lexi_store::{InMemoryDocumentStore, InMemoryHistoryStore};

    fn orchestrator(responses: Vec<MockResponse>) -> Arc<TurnOrchestrator> {
        Arc::new(TurnOrchestrator::new(
            Arc::new(MockProvider::new(responses)),
            Arc::new(create_default_registry(Duration::from_secs(5))),
            Arc::new(InMemoryHistoryStore::default()),
            Arc::new(InMemoryDocumentStore::default()),
            EngineConfig::default(),
        ))
    }

    fn router(responses: Vec<MockResponse>) -> Router {
        build_router(AppState {
            orchestrator: orchestrator(responses),
        })
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn stream_emits_frames_and_session_header() {
        let app = router(vec![
            MockResponse::tool_uses(
                Some("Drafting."),
                vec![(
                    "toolu_1",
                    "generate_document",
                    json!({"document_type": "memo", "title": "Notice", "content_requirements": "Late rent"}),
                )],
            ),
            MockResponse::text("Here is your memo."),
        ]);

        let resp = app
            .oneshot(post_json("/stream", json!({"message": "Draft a memo", "session_id": "sess_abc"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");
        assert_eq!(resp.headers()[SESSION_HEADER], "sess_abc");

        let text = body_text(resp).await;
        let frames: Vec<&str> = text
            .split("\n\n")
            .filter(|f| !f.is_empty())
            .map(|f| f.strip_prefix("data: ").unwrap())
            .collect();

        assert_eq!(frames[0], "Drafting.");
        assert_eq!(frames[1], "[TOOL_START:generate_document]");
        assert_eq!(frames[2], "[TOOL_EXECUTING:generate_document]");
        assert_eq!(frames[3], "[TOOL_RESULT:generate_document]");
        assert!(frames[4].starts_with("[ARTIFACT:"));
        assert_eq!(frames[5], "Here is your memo.");
        assert_eq!(frames[6], "[DONE]");
        assert_eq!(frames.len(), 7);

        let artifact = frames[4].trim_start_matches("[ARTIFACT:").trim_end_matches(']');
        let payload: Value = serde_json::from_slice(&STANDARD.decode(artifact).unwrap()).unwrap();
        assert_eq!(payload["version"], 1);
        assert!(payload["content"].as_str().unwrap().contains("NOTICE"));
    }

    #[tokio::test]
    async fn stream_generates_session_id_when_missing() {
        let app = router(vec![MockResponse::text("hi")]);
        let resp = app.oneshot(post_json("/stream", json!({"message": "hello"}))).await.unwrap();
        let session = resp.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert!(session.starts_with("sess_"));
        assert!(body_text(resp).await.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn stream_error_ends_without_done() {
        let app = router(vec![MockResponse::Error(GatewayError::RateLimited { retry_after: None })]);
        let resp = app.oneshot(post_json("/stream", json!({"message": "hello"}))).await.unwrap();
        let text = body_text(resp).await;
        assert!(text.starts_with("data: [ERROR:"));
        assert!(!text.contains("[DONE]"));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let app = router(vec![]);
        for uri in ["/stream", "/chat"] {
            let resp = app
                .clone()
                .oneshot(post_json(uri, json!({"message": "   "})))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(resp).await["kind"], "bad_request");
        }
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = router(vec![]);
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_history_documents_and_clear() {
        let orch = orchestrator(vec![MockResponse::text("Hello!")]);
        let app = build_router(AppState {
            orchestrator: Arc::clone(&orch),
        });

        let resp = app
            .clone()
            .oneshot(post_json("/chat", json!({"message": "Hi", "session_id": "sess_chat"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["response"], "Hello!");
        assert_eq!(body["message_received"], "Hi");
        assert_eq!(body["session_id"], "sess_chat");
        assert_eq!(body["rounds"], 1);
        assert_eq!(body["artifacts"], json!([]));

        let req = Request::builder()
            .uri("/sessions/sess_chat/history")
            .body(Body::empty())
            .unwrap();
        let body = body_json(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(body["session_id"], "sess_chat");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["content"], "Hi");

        let req = Request::builder()
            .uri("/sessions/sess_chat/documents")
            .body(Body::empty())
            .unwrap();
        let body = body_json(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(body["versions"], json!([]));
        assert_eq!(body["latest_version"], Value::Null);

        let req = Request::builder()
            .method("DELETE")
            .uri("/sessions/sess_chat")
            .body(Body::empty())
            .unwrap();
        let body = body_json(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(body["cleared_history"], true);
        assert_eq!(body["cleared_documents"], false);
        assert!(orch.history().get(&SessionId::from_raw("sess_chat")).is_empty());
    }

    #[tokio::test]
    async fn unknown_session_history_is_not_tracked() {
        let orch = orchestrator(vec![]);
        let app = build_router(AppState {
            orchestrator: Arc::clone(&orch),
        });
        let req = Request::builder()
            .uri("/sessions/sess_nobody/history")
            .body(Body::empty())
            .unwrap();
        let body = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(body["messages"], json!([]));
        assert_eq!(orch.history().session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_turn_commits_after_client_goes_away() {
        let draft = json!({"document_type": "memo", "title": "Notice", "content_requirements": "Late rent"});
        let orch = orchestrator(vec![
            MockResponse::tool_uses(None, vec![("toolu_1", "generate_document", draft)]),
            MockResponse::delayed(Duration::from_secs(10), MockResponse::text("Memo ready.")),
        ]);
        let app = build_router(AppState {
            orchestrator: Arc::clone(&orch),
        });

        let request = app.oneshot(post_json("/chat", json!({"message": "Draft a memo", "session_id": "sess_gone"})));
        assert!(tokio::time::timeout(Duration::from_secs(1), request).await.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        let session = SessionId::from_raw("sess_gone");
        assert_eq!(orch.documents().versions(&session).len(), 1);
        let history = orch.history().get(&session);
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].text_content(), "Memo ready.");
    }

    #[tokio::test]
    async fn chat_upstream_failure_is_bad_gateway() {
        let app = router(vec![MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into()))]);
        let resp = app.oneshot(post_json("/chat", json!({"message": "Hi"}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(resp).await;
        assert_eq!(body["kind"], "authentication_failed");
    }

    #[tokio::test]
    async fn extract_returns_object_or_unprocessable() {
        let app = router(vec![
            MockResponse::text(r#"{"tenant": "Beta LLC"}"#),
            MockResponse::text("Sorry, I can't help with that."),
        ]);

        let ok = app
            .clone()
            .oneshot(post_json(
                "/extract",
                json!({"source_text": "Acme leases to Beta LLC.", "fields": ["tenant", "rent"]}),
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await, json!({"tenant": "Beta LLC", "rent": null}));

        let bad = app
            .oneshot(post_json(
                "/extract",
                json!({"source_text": "Acme leases to Beta LLC.", "fields": ["tenant"]}),
            ))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(bad).await;
        assert_eq!(body["raw_text"], "Sorry, I can't help with that.");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let handle = start(config, orchestrator(vec![])).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "mock-model");
        assert_eq!(body["sessions"], 0);

        handle.shutdown().await;
    }
}
