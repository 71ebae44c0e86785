//! Static front-end serving with path-traversal prevention and SPA fallback.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::AppState;

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Lexically rejects absolute paths and `..`, then re-checks the resolved
/// path stays inside the dist directory.
fn resolve(dist: &Path, request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    let relative = if trimmed.is_empty() { "index.html" } else { trimmed };
    let candidate = Path::new(relative);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    let joined = dist.join(candidate);
    match joined.canonicalize() {
        Ok(real) => {
            let real_dist = dist.canonicalize().ok()?;
            if real.starts_with(real_dist) {
                Some(real)
            } else {
                None
            }
        }
        Err(_) => Some(joined),
    }
}

pub async fn serve_static(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let dist = match &state.dist_dir {
        Some(d) => d.clone(),
        None => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    let resolved = match resolve(&dist, uri.path()) {
        Some(p) => p,
        None => return (StatusCode::FORBIDDEN, "forbidden").into_response(),
    };

    let target = if resolved.is_file() {
        resolved
    } else if uri.path().contains('.') {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    } else {
        // SPA fallback: unknown extensionless routes render the app shell.
        dist.join("index.html")
    };

    match tokio::fs::read(&target).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type(&target))],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}
