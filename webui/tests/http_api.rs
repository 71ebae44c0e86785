//! Control-plane tests against the router via `tower::ServiceExt::oneshot`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::FutureExt;
use http_body_util::BodyExt;
use tower::ServiceExt;

use teleton::memory::MemorySystem;
use teleton::paths::AgentDirs;
use teleton::tools::ToolRegistry;
use teleton::{Lifecycle, Store};
use teleton_config::AgentConfig;
use webui::{router, AppState, MAX_BODY_BYTES};

const TOKEN: &str = "test-token-123";

fn state(lifecycle: Option<Arc<Lifecycle>>) -> Arc<AppState> {
    let store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    let registry = Arc::new(ToolRegistry::new(store.clone()));
    let dir = std::env::temp_dir().join("teleton-webui-test");
    let memory = Arc::new(MemorySystem::new(store.clone(), None, dir.clone()));
    Arc::new(AppState {
        lifecycle,
        store,
        registry,
        memory,
        dirs: AgentDirs::new(dir),
        config: AgentConfig::default(),
        auth_token: TOKEN.to_string(),
        sessions: Mutex::new(HashSet::new()),
        dist_dir: None,
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let app = router(state(None));
    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn protected_route_rejects_anonymous() {
    let app = router(state(None));
    let response = app
        .oneshot(Request::get("/api/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_token_grants_access() {
    let app = router(state(None));
    let response = app
        .oneshot(
            Request::get("/api/tools")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_token_grants_access() {
    let app = router(state(None));
    let response = app
        .oneshot(
            Request::get(format!("/api/tools?token={}", TOKEN).as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_sets_cookie_and_check_reports_it() {
    let app = router(state(None));
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!("{{\"token\":\"{}\"}}", TOKEN)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));

    let cookie_pair = set_cookie.split(';').next().unwrap().to_string();
    let response = app
        .oneshot(
            Request::get("/api/auth/check")
                .header(header::COOKIE, cookie_pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["authenticated"], true);
}

#[tokio::test]
async fn wrong_login_token_is_rejected() {
    let app = router(state(None));
    let response = app
        .oneshot(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"token\":\"nope\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agent_endpoints_503_without_lifecycle() {
    let app = router(state(None));
    for path in ["/api/agent/status", "/api/agent/start", "/api/agent/stop"] {
        let request = if path.ends_with("status") {
            Request::get(path)
        } else {
            Request::post(path)
        }
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", path);
    }
}

#[tokio::test]
async fn start_while_stopping_conflicts() {
    let lifecycle = Arc::new(Lifecycle::new());
    lifecycle
        .set_hooks(
            || async { Ok(()) }.boxed(),
            || {
                async {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Ok(())
                }
                .boxed()
            },
        )
        .unwrap();
    lifecycle.start().await.unwrap();
    let stopper = {
        let l = Arc::clone(&lifecycle);
        tokio::spawn(async move { l.stop().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let app = router(state(Some(Arc::clone(&lifecycle))));
    let response = app
        .oneshot(
            Request::post("/api/agent/start")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    stopper.await.unwrap().unwrap();
}

#[tokio::test]
async fn status_reports_state_and_uptime() {
    let lifecycle = Arc::new(Lifecycle::new());
    lifecycle.start().await.unwrap();
    let app = router(state(Some(Arc::clone(&lifecycle))));
    let response = app
        .oneshot(
            Request::get("/api/agent/status")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["state"], "running");
    assert!(json["data"]["uptime"].is_number());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = router(state(None));
    let big = "x".repeat(MAX_BODY_BYTES + 1);
    let response = app
        .oneshot(
            Request::post("/api/memory")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!("{{\"text\":\"{}\"}}", big)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn security_headers_are_set() {
    let app = router(state(None));
    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
}

#[tokio::test]
async fn workspace_rejects_escapes() {
    let app = router(state(None));
    let response = app
        .oneshot(
            Request::get("/api/workspace?path=../config.yaml")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
