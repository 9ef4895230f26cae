//! Axum handlers.
//!
//! Every handler receives [`AxumState`] via [`axum::extract::State`].
//! Validation failures answer 400, internal failures a generic 500 whose
//! body never carries the underlying error text.

use std::any::Any;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{StreamExt, stream::{self, BoxStream}};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::AxumState;
use crate::error::AppError;
use crate::subsystems::agents::{Action, Reply, SessionAgent, StreamEvent, Turn};

pub(super) const SESSION_HEADER: &str = "x-session-id";

const INTERNAL_ERROR_MESSAGE: &str = "Ha ocurrido un error interno en el servidor.";

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InteractRequest {
    #[serde(alias = "command")]
    comando: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, json_error("bad_request", msg)).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, json_error("internal", INTERNAL_ERROR_MESSAGE)).into_response()
}

fn session_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| bad_request("La cabecera 'X-Session-ID' es requerida."))
}

fn command_text(body: &Bytes) -> Result<String, Response> {
    serde_json::from_slice::<InteractRequest>(body)
        .ok()
        .and_then(|req| req.comando)
        .ok_or_else(|| bad_request("El campo 'comando' es requerido."))
}

fn sse_json(value: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(value.to_string()))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        internal_error()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET / — liveness and endpoint listing.
pub(super) async fn root(State(state): State<AxumState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "message": format!("Bienvenido al servidor de {}. El cerebro está activo.", state.info.bot_name),
        "llm_provider": state.info.llm_provider,
        "memory_backend": state.info.memory_backend,
        "endpoints": {
            "saludo": "/saludo (GET)",
            "interact": "/interact (POST)",
            "interact_stream": "/interact-stream (POST)",
            "sessions": "/admin/sessions (GET)",
        },
        "info": "Todas las peticiones a /saludo, /interact e /interact-stream requieren una cabecera 'X-Session-ID'.",
    }))
}

/// GET /saludo
pub(super) async fn greeting(
    State(state): State<AxumState>,
    headers: HeaderMap,
) -> Result<Json<Reply>, Response> {
    let session_id = session_id(&headers)?;
    let agent = state.registry.get_or_create(&session_id).await.map_err(IntoResponse::into_response)?;
    let speech = agent.lock().await.greet();
    Ok(Json(Reply { speech, action: Action::None }))
}

/// POST /interact
pub(super) async fn interact(
    State(state): State<AxumState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Reply>, Response> {
    let session_id = session_id(&headers)?;
    let text = command_text(&body)?;
    info!(%session_id, command = %text, "command received");

    let agent = state.registry.get_or_create(&session_id).await.map_err(IntoResponse::into_response)?;
    let reply = agent.lock().await.respond(&text).await;
    Ok(Json(reply))
}

/// POST /interact-stream
///
/// Command replies arrive as one `{speech, action}` event. Model replies
/// arrive as `{speech_chunk}` events closed by `{done: true}`.
pub(super) async fn interact_stream(
    State(state): State<AxumState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let session_id = session_id(&headers)?;
    let text = command_text(&body)?;
    info!(%session_id, command = %text, "streaming command received");

    let agent = state.registry.get_or_create(&session_id).await.map_err(IntoResponse::into_response)?;
    let guard = agent.lock_owned().await;

    let events: BoxStream<'static, Result<Event, Infallible>> =
        match SessionAgent::respond_streaming(guard, &text).await {
            Turn::Complete(reply) => {
                stream::once(async move { sse_json(json!({ "speech": reply.speech, "action": reply.action })) })
                    .boxed()
            }
            Turn::Streaming(fragments) => fragments
                .map(|event| match event {
                    StreamEvent::Chunk(chunk) => sse_json(json!({ "speech_chunk": chunk })),
                    StreamEvent::Done => sse_json(json!({ "done": true })),
                })
                .boxed(),
        };

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

/// GET /admin/sessions
pub(super) async fn sessions(State(state): State<AxumState>) -> Json<serde_json::Value> {
    let ids = state.registry.session_ids();
    let count = ids.len();
    Json(json!({ "active_sessions": ids, "count": count }))
}

/// Fallback for unknown routes.
pub(super) async fn not_found(uri: Uri) -> Response {
    (StatusCode::NOT_FOUND, json_error("not_found", format!("Ruta no encontrada: {}", uri.path())))
        .into_response()
}

/// Body for a handler that panicked.
pub(super) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("<non-string panic>");
    error!(panic = %detail, "handler panicked");
    internal_error()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, Router};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmBridge, LlmProvider};
    use crate::subsystems::agents::apps::AppLauncher;
    use crate::subsystems::agents::SessionRegistry;
    use crate::subsystems::comms::axum_channel::{build_router, ServiceInfo};
    use crate::subsystems::memory::MemoryStore;

    fn router_with(dir: &TempDir, llm: Result<Arc<LlmBridge>, String>) -> Router {
        let config = Config::test_default(dir.path());
        let registry = SessionRegistry::new(
            config.sessions.capacity,
            MemoryStore::from_config(&config).unwrap(),
            llm,
            Arc::new(AppLauncher::from_config(&config.apps)),
        );
        let info = ServiceInfo {
            bot_name: "Nexus".into(),
            llm_provider: "dummy".into(),
            memory_backend: "file".into(),
        };
        build_router(AxumState::new(Arc::new(registry), info))
    }

    fn router(dir: &TempDir) -> Router {
        router_with(dir, Ok(Arc::new(LlmBridge::new(LlmProvider::Dummy(DummyProvider), 6))))
    }

    fn post(uri: &str, session: Option<&str>, body: &str) -> Request<Body> {
        let mut req = Request::post(uri).header("content-type", "application/json");
        if let Some(s) = session {
            req = req.header("X-Session-ID", s);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, session: Option<&str>) -> Request<Body> {
        let mut req = Request::get(uri);
        if let Some(s) = session {
            req = req.header("X-Session-ID", s);
        }
        req.body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(resp).await).unwrap()
    }

    fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| serde_json::from_str(d.trim()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn root_is_public() {
        let dir = TempDir::new().unwrap();
        let resp = router(&dir).oneshot(get("/", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["status"], "online");
        assert_eq!(v["llm_provider"], "dummy");
    }

    #[tokio::test]
    async fn missing_header_is_400() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let resp = app.clone().oneshot(get("/saludo", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "bad_request");

        let resp = app.oneshot(post("/interact", None, r#"{"comando":"hola"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_command_is_400() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        for body in ["{}", "not json", ""] {
            let resp = app.clone().oneshot(post("/interact", Some("s1"), body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body:?}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let dir = TempDir::new().unwrap();
        let resp = router(&dir).oneshot(get("/nope", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "not_found");
    }

    #[tokio::test]
    async fn interact_names_then_opens_url() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let resp = app.clone().oneshot(post("/interact", Some("s1"), r#"{"comando":"Nova"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert!(v["speech"].as_str().unwrap().contains("Nova"));
        assert_eq!(v["action"]["type"], "none");

        let resp = app.oneshot(post("/interact", Some("s1"), r#"{"command":"ABRE example.org"}"#)).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["action"], json!({"type": "open_url", "payload": {"url": "https://example.org"}}));
    }

    #[tokio::test]
    async fn greeting_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let first = body_json(app.clone().oneshot(get("/saludo", Some("g"))).await.unwrap()).await;
        let second = body_json(app.oneshot(get("/saludo", Some("g"))).await.unwrap()).await;
        assert_eq!(first, second);
        assert_eq!(first["action"]["type"], "none");
    }

    #[tokio::test]
    async fn stream_command_is_single_event() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let resp = app.oneshot(post("/interact-stream", Some("s1"), r#"{"comando":"nova"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let events = sse_payloads(&body_text(resp).await);
        assert_eq!(events.len(), 1);
        assert!(events[0]["speech"].as_str().unwrap().contains("Nova"));
        assert_eq!(events[0]["action"]["type"], "none");
    }

    #[tokio::test]
    async fn stream_model_reply_chunks_then_done() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        app.clone().oneshot(post("/interact", Some("s1"), r#"{"comando":"nova"}"#)).await.unwrap();

        let resp = app
            .clone()
            .oneshot(post("/interact-stream", Some("s1"), r#"{"comando":"cuéntame algo"}"#))
            .await
            .unwrap();
        let events = sse_payloads(&body_text(resp).await);
        assert_eq!(events.last(), Some(&json!({"done": true})));
        let joined: String = events
            .iter()
            .filter_map(|e| e["speech_chunk"].as_str())
            .collect();
        assert!(joined.starts_with("[echo] "));
        assert!(events.len() > 2);
    }

    #[tokio::test]
    async fn admin_lists_cached_sessions() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        for id in ["a", "b"] {
            app.clone().oneshot(get("/saludo", Some(id))).await.unwrap();
        }
        let v = body_json(app.oneshot(get("/admin/sessions", None)).await.unwrap()).await;
        assert_eq!(v["count"], 2);
        assert_eq!(v["active_sessions"], json!(["b", "a"]));
    }

    #[tokio::test]
    async fn missing_model_is_generic_500() {
        let dir = TempDir::new().unwrap();
        let app = router_with(&dir, Err("LLM_API_KEY is not set".into()));
        let resp = app.oneshot(post("/interact", Some("s1"), r#"{"comando":"hola"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let v = body_json(resp).await;
        assert_eq!(v["error"], "internal");
        assert!(!v["message"].as_str().unwrap().contains("LLM_API_KEY"));
    }
}
