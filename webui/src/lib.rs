//! Teleton control plane: loopback HTTP server with cookie/bearer auth and a
//! Server-Sent-Events stream of lifecycle transitions (axum).
//!
//! **Public API**: [`run_webui`], [`run_webui_on_listener`], [`AppState`],
//! [`router`].

mod assets;
mod auth;
mod events;
mod routes;

pub use auth::SESSION_COOKIE;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use teleton::memory::MemorySystem;
use teleton::paths::AgentDirs;
use teleton::tools::ToolRegistry;
use teleton::{Lifecycle, Store};
use teleton_config::AgentConfig;

/// Request bodies above this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub struct AppState {
    /// `None` renders agent endpoints as 503 (control plane up, agent not
    /// wired).
    pub lifecycle: Option<Arc<Lifecycle>>,
    pub store: Store,
    pub registry: Arc<ToolRegistry>,
    pub memory: Arc<MemorySystem>,
    pub dirs: AgentDirs,
    pub config: AgentConfig,
    pub auth_token: String,
    /// Issued session-cookie ids.
    pub sessions: Mutex<HashSet<String>>,
    /// Built front-end directory; `None` disables the static route.
    pub dist_dir: Option<PathBuf>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/agent/start", post(routes::agent_start))
        .route("/api/agent/stop", post(routes::agent_stop))
        .route("/api/agent/status", get(routes::agent_status))
        .route("/api/agent/events", get(events::agent_events))
        .route("/api/tools", get(routes::tools_list))
        .route("/api/plugins", get(routes::plugins_list))
        .route("/api/marketplace", get(routes::marketplace_list))
        .route("/api/mcp", get(routes::mcp_list))
        .route("/api/memory", get(routes::memory_search).post(routes::memory_ingest))
        .route("/api/logs", get(routes::logs_recent))
        .route("/api/tasks", get(routes::tasks_list).post(routes::tasks_create))
        .route("/api/config", get(routes::config_view))
        .route("/api/workspace", get(routes::workspace_list))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check", get(auth::check))
        .merge(protected)
        .fallback(assets::serve_static)
        .layer(middleware::from_fn(security_headers))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn security_headers(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Serves on an existing listener; tests bind `127.0.0.1:0` and pass it in.
pub async fn run_webui_on_listener(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    info!("webui listening on http://{}", addr);
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

pub async fn run_webui(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind((host, port)).await?;
    run_webui_on_listener(state, listener, shutdown).await
}
