//! Control-plane auth: constant-time token compare, session cookies, and the
//! middleware that accepts cookie, bearer header or `?token=` query in that
//! order.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

pub const SESSION_COOKIE: &str = "teleton_session";

/// Byte-wise constant-time comparison. Length mismatch returns early; the
/// length of the expected token is not secret.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn query_token(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "token" {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn has_valid_session(state: &AppState, jar: &CookieJar) -> bool {
    jar.get(SESSION_COOKIE)
        .map(|cookie| state.sessions.lock().unwrap().contains(cookie.value()))
        .unwrap_or(false)
}

/// Middleware: session cookie, then `Authorization: Bearer`, then `?token=`
/// (bootstrap links). 401 otherwise.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    if has_valid_session(&state, &jar) {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    if let Some(token) = bearer {
        if constant_time_eq(&token, &state.auth_token) {
            return next.run(request).await;
        }
    }

    if let Some(token) = query_token(&request) {
        if constant_time_eq(&token, &state.auth_token) {
            return next.run(request).await;
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"success": false, "error": "unauthorized"})),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct LoginBody {
    token: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<LoginBody>,
) -> Response {
    if !constant_time_eq(&body.token, &state.auth_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "invalid token"})),
        )
            .into_response();
    }
    let sid = Uuid::new_v4().to_string();
    state.sessions.lock().unwrap().insert(sid.clone());
    let cookie = Cookie::build((SESSION_COOKIE, sid))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .build();
    (jar.add(cookie), Json(json!({"success": true}))).into_response()
}

pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.lock().unwrap().remove(cookie.value());
    }
    let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(removal), Json(json!({"success": true}))).into_response()
}

pub async fn check(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let authenticated = has_valid_session(&state, &jar);
    Json(json!({"success": true, "data": {"authenticated": authenticated}})).into_response()
}
