//! JSON API handlers. Everything returns the `{success, data?, error?}`
//! envelope; stack traces stay in the logs.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use teleton::LifecycleState;

use crate::AppState;

fn ok(data: serde_json::Value) -> Response {
    Json(json!({"success": true, "data": data})).into_response()
}

fn fail(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"success": false, "error": message})),
    )
        .into_response()
}

pub async fn health() -> Response {
    Json(json!({"success": true, "data": {"status": "ok"}})).into_response()
}

pub async fn agent_start(State(state): State<Arc<AppState>>) -> Response {
    let lifecycle = match &state.lifecycle {
        Some(l) => Arc::clone(l),
        None => return fail(StatusCode::SERVICE_UNAVAILABLE, "lifecycle not available"),
    };
    match lifecycle.state() {
        LifecycleState::Stopping => {
            return fail(StatusCode::CONFLICT, "cannot start while stopping")
        }
        LifecycleState::Running | LifecycleState::Starting => {
            return ok(json!({"state": lifecycle.state().as_str()}))
        }
        LifecycleState::Stopped => {}
    }
    // The transition is accepted; completion is observable on /status and the
    // event stream.
    tokio::spawn(async move {
        if let Err(e) = lifecycle.start().await {
            error!(error = %e, "agent start failed");
        }
    });
    ok(json!({"state": "starting"}))
}

pub async fn agent_stop(State(state): State<Arc<AppState>>) -> Response {
    let lifecycle = match &state.lifecycle {
        Some(l) => Arc::clone(l),
        None => return fail(StatusCode::SERVICE_UNAVAILABLE, "lifecycle not available"),
    };
    if lifecycle.state() == LifecycleState::Stopped {
        return ok(json!({"state": "stopped"}));
    }
    tokio::spawn(async move {
        if let Err(e) = lifecycle.stop().await {
            error!(error = %e, "agent stop failed");
        }
    });
    ok(json!({"state": "stopping"}))
}

pub async fn agent_status(State(state): State<Arc<AppState>>) -> Response {
    let lifecycle = match &state.lifecycle {
        Some(l) => l,
        None => return fail(StatusCode::SERVICE_UNAVAILABLE, "lifecycle not available"),
    };
    ok(json!({
        "state": lifecycle.state().as_str(),
        "uptime": lifecycle.uptime(),
        "error": lifecycle.last_error(),
    }))
}

pub async fn tools_list(State(state): State<Arc<AppState>>) -> Response {
    let specs = state.registry.all_specs();
    match state.store.tool_config_all().await {
        Ok(overrides) => {
            let data: Vec<serde_json::Value> = specs
                .iter()
                .map(|s| {
                    let row = overrides.get(&s.name);
                    json!({
                        "name": s.name,
                        "description": s.description,
                        "module": s.module,
                        "scope": s.scope.as_str(),
                        "enabled": row.map(|r| r.enabled).unwrap_or(true),
                        "scope_override": row.and_then(|r| r.scope.clone()),
                    })
                })
                .collect();
            ok(json!(data))
        }
        Err(e) => {
            error!(error = %e, "tool config read failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

pub async fn plugins_list(State(state): State<Arc<AppState>>) -> Response {
    ok(json!(state.registry.plugin_namespaces()))
}

/// Marketplace browsing is an online feature; the control plane only reports
/// an empty catalog when no feed is configured.
pub async fn marketplace_list() -> Response {
    ok(json!([]))
}

pub async fn mcp_list() -> Response {
    ok(json!({"servers": []}))
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

pub async fn memory_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.q.unwrap_or_default();
    if query.is_empty() {
        let count = match state.store.knowledge_count().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "knowledge count failed");
                return fail(StatusCode::INTERNAL_SERVER_ERROR, "storage error");
            }
        };
        return ok(json!({"chunks": count}));
    }
    match state
        .memory
        .retrieve(&query, params.limit.unwrap_or(10).clamp(1, 50))
        .await
    {
        Ok(hits) => ok(json!(hits
            .iter()
            .map(|h| json!({
                "id": h.chunk.id,
                "text": h.chunk.text,
                "source": h.chunk.source.as_str(),
                "score": h.score,
            }))
            .collect::<Vec<_>>())),
        Err(e) => {
            error!(error = %e, "memory search failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "search error")
        }
    }
}

#[derive(Deserialize)]
pub struct IngestBody {
    text: String,
}

pub async fn memory_ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestBody>,
) -> Response {
    match state
        .memory
        .ingest(teleton::KnowledgeSource::Memory, None, &body.text)
        .await
    {
        Ok(inserted) => {
            info!(inserted, "memory ingested via control plane");
            ok(json!({"inserted": inserted}))
        }
        Err(e) => {
            error!(error = %e, "memory ingest failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "ingest error")
        }
    }
}

pub async fn logs_recent(State(state): State<Arc<AppState>>) -> Response {
    match state.memory.daily_log().read_recent().await {
        Ok(content) => ok(json!({"content": content})),
        Err(e) => {
            error!(error = %e, "daily log read failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "log read error")
        }
    }
}

pub async fn tasks_list(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_tasks(None).await {
        Ok(tasks) => ok(json!(tasks
            .iter()
            .map(|t| json!({
                "id": t.id,
                "description": t.description,
                "status": t.status.as_str(),
                "priority": t.priority,
                "created_by": t.created_by,
                "error": t.error,
            }))
            .collect::<Vec<_>>())),
        Err(e) => {
            error!(error = %e, "task list failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

#[derive(Deserialize)]
pub struct CreateTaskBody {
    description: String,
    #[serde(default)]
    priority: i64,
}

pub async fn tasks_create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskBody>,
) -> Response {
    match state
        .store
        .create_task(body.description, body.priority, "webui".into(), None, None)
        .await
    {
        Ok(task) => ok(json!({"id": task.id})),
        Err(e) => {
            error!(error = %e, "task create failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

/// Redacted configuration view; secrets never leave the process.
pub async fn config_view(State(state): State<Arc<AppState>>) -> Response {
    let c = &state.config;
    ok(json!({
        "model": c.model,
        "embedding_model": c.embedding_model,
        "base_url": c.base_url,
        "max_agentic_iterations": c.max_agentic_iterations,
        "owner_name": c.owner_name,
        "webui": {"enabled": c.webui.enabled, "port": c.webui.port, "host": c.webui.host},
        "api_key_set": c.api_key.is_some(),
        "tavily_key_set": c.tavily_api_key.is_some(),
        "tonapi_key_set": c.tonapi_key.is_some(),
    }))
}

#[derive(Deserialize)]
pub struct WorkspaceParams {
    #[serde(default)]
    path: String,
}

/// Read-only workspace browser; every path goes through the escape guard.
pub async fn workspace_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WorkspaceParams>,
) -> Response {
    let resolved = match state.dirs.resolve_workspace_path(&params.path) {
        Ok(p) => p,
        Err(e) => return fail(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if resolved.is_dir() {
        let mut entries = Vec::new();
        match tokio::fs::read_dir(&resolved).await {
            Ok(mut dir) => {
                while let Ok(Some(entry)) = dir.next_entry().await {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    entries.push(json!({"name": name, "dir": is_dir}));
                }
                ok(json!({"entries": entries}))
            }
            Err(e) => {
                error!(error = %e, "workspace read_dir failed");
                fail(StatusCode::INTERNAL_SERVER_ERROR, "read error")
            }
        }
    } else {
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ok(json!({"content": content})),
            Err(_) => fail(StatusCode::NOT_FOUND, "not found"),
        }
    }
}
