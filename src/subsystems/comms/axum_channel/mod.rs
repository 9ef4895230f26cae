//! Axum HTTP channel — the service's only inbound surface.
//!
//! The [`CancellationToken`] passed to [`AxumChannel::run`] is wired to
//! axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET  /                  info payload, no session needed
//! GET  /saludo            greeting for the session (X-Session-ID)
//! POST /interact          {"comando": "..."} → {speech, action}
//! POST /interact-stream   same input, server-sent events
//! GET  /admin/sessions    cached session ids
//! *                       404 {"error": "not_found", ...}
//! ```

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::error::AppError;
use crate::subsystems::agents::SessionRegistry;

/// Static facts reported by `GET /`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub bot_name: String,
    pub llm_provider: String,
    pub memory_backend: String,
}

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone — all fields are reference-counted.
#[derive(Clone)]
pub struct AxumState {
    pub registry: Arc<SessionRegistry>,
    pub info: Arc<ServiceInfo>,
}

impl AxumState {
    pub fn new(registry: Arc<SessionRegistry>, info: ServiceInfo) -> Self {
        Self { registry, info: Arc::new(info) }
    }
}

// ── AxumChannel ───────────────────────────────────────────────────────────────

pub struct AxumChannel {
    bind_addr: String,
    state: AxumState,
}

impl AxumChannel {
    pub fn new(bind_addr: impl Into<String>, state: AxumState) -> Self {
        Self { bind_addr: bind_addr.into(), state }
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| AppError::Comms(format!("axum bind failed on {}: {e}", self.bind_addr)))?;

        let local = listener.local_addr().map_err(AppError::Io)?;
        info!(bind_addr = %local, "axum channel listening");

        axum::serve(listener, build_router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

        info!("axum channel shut down");
        Ok(())
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/",                get(api::root))
        .route("/saludo",          get(api::greeting))
        .route("/interact",        post(api::interact))
        .route("/interact-stream", post(api::interact_stream))
        .route("/admin/sessions",  get(api::sessions))
        .fallback(api::not_found)
        .layer(CatchPanicLayer::custom(api::panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
