//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use yc_next_runtime::{
    api::create_router,
    cache::{IsrCache, SetOptions},
    manifest::{MatcherSpec, MiddlewareMode},
    middleware::{CompiledMiddleware, MiddlewareEmulator, NativeExecutor, SandboxExecutor},
    AppState,
};

// == Helper Functions ==

fn create_test_app() -> (Router, IsrCache) {
    let cache = IsrCache::in_memory("build-1");
    let state = AppState::new(cache.clone(), MiddlewareEmulator::disabled())
        .with_revalidation_secret(Some("s3cret".to_string()));
    (create_router(state), cache)
}

fn app_with_middleware(source: &str, pattern: &str) -> Router {
    let middleware = CompiledMiddleware::from_source(source, &[MatcherSpec::new(pattern)]).unwrap();
    let emulator = MiddlewareEmulator::new(
        MiddlewareMode::Emulated,
        middleware,
        Arc::new(SandboxExecutor::default()),
        Arc::new(NativeExecutor::new("node", Duration::from_secs(5))),
    );
    create_router(AppState::new(IsrCache::in_memory("build-1"), emulator))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// == Cache Endpoint Tests ==

#[tokio::test]
async fn test_put_then_get_entry() {
    let (app, _) = create_test_app();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/cache",
            json!({
                "key": "/blog/hello",
                "value": "PGgxPkhpPC9oMT4=",
                "options": {
                    "headers": {"content-type": "text/html"},
                    "tags": ["posts"]
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "/blog/hello");

    let response = app
        .oneshot(get_request("/api/cache?key=%2Fblog%2Fhello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["value"], "PGgxPkhpPC9oMT4=");
    assert_eq!(json["status"], 200);
    assert_eq!(json["headers"]["content-type"], "text/html");
    assert_eq!(json["tags"], json!(["posts"]));
    assert_eq!(json["isStale"], false);
}

#[tokio::test]
async fn test_get_missing_entry_is_404() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get_request("/api/cache?key=%2Fnope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("/nope"));
}

#[tokio::test]
async fn test_delete_entry() {
    let (app, cache) = create_test_app();
    cache
        .set("/gone", b"x".to_vec(), SetOptions::new())
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/cache?key=%2Fgone")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/api/cache?key=%2Fgone")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_invalid_entry_is_400() {
    let (app, _) = create_test_app();

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/api/cache", json!({"key": "", "value": "aGk="})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/cache",
            json!({"key": "/a", "value": "aGk=", "options": {"status": 42}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Revalidate Endpoint Tests ==

#[tokio::test]
async fn test_revalidate_by_tag() {
    let (app, cache) = create_test_app();
    for key in ["/blog/a", "/blog/b"] {
        cache
            .set(key, b"post".to_vec(), SetOptions::new().with_tags(["posts"]))
            .await
            .unwrap();
    }
    cache
        .set("/about", b"about".to_vec(), SetOptions::new().with_tags(["pages"]))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/revalidate",
            json!({"tag": "posts", "secret": "s3cret"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["revalidated"], true);
    assert_eq!(json["invalidated"], 2);
    assert!(json["now"].as_i64().unwrap() > 0);

    assert!(cache.get("/blog/a").await.is_none());
    assert!(cache.get("/blog/b").await.is_none());
    assert!(cache.get("/about").await.is_some());
}

#[tokio::test]
async fn test_revalidate_by_path_with_header_secret() {
    let (app, cache) = create_test_app();
    cache
        .set("/pricing", b"old".to_vec(), SetOptions::new())
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/revalidate")
                .header("content-type", "application/json")
                .header("x-revalidate-secret", "s3cret")
                .body(Body::from(r#"{"path":"/pricing"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(cache.get("/pricing").await.is_none());
}

#[tokio::test]
async fn test_revalidate_wrong_secret_is_401() {
    let (app, cache) = create_test_app();
    cache
        .set("/pricing", b"old".to_vec(), SetOptions::new())
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/revalidate",
            json!({"path": "/pricing", "secret": "nope"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(cache.get("/pricing").await.is_some());
}

#[tokio::test]
async fn test_revalidate_without_target_is_400() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(json_request("POST", "/api/revalidate", json!({"secret": "s3cret"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Middleware Endpoint Tests ==

#[tokio::test]
async fn test_middleware_disabled_yields_none() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/middleware",
            json!({"httpMethod": "GET", "path": "/", "headers": {"host": "example.com"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await, json!({"outcome": "none"}));
}

#[tokio::test]
async fn test_middleware_redirect_decision() {
    let app = app_with_middleware(
        r#"
        function middleware(request) {
            if (!request.cookies.has("session")) {
                return NextResponse.redirect(new URL("/login", request.url));
            }
            return NextResponse.next();
        }
        "#,
        "^/account(?:/.*)?$",
    );

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/middleware",
            json!({
                "httpMethod": "GET",
                "path": "/account",
                "headers": {"host": "shop.example.com", "x-forwarded-proto": "https"},
                "queryStringParameters": null
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["outcome"], "redirect");
    assert_eq!(json["response"]["statusCode"], 307);
    assert_eq!(
        json["response"]["headers"]["location"],
        "https://shop.example.com/login"
    );

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/middleware",
            json!({
                "httpMethod": "GET",
                "path": "/account",
                "headers": {"host": "shop.example.com", "cookie": "session=1"}
            }),
        ))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["outcome"], "continue");
}

#[tokio::test]
async fn test_middleware_not_matching_yields_none() {
    let app = app_with_middleware("function middleware() { throw new Error('ran'); }", "^/admin$");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/middleware",
            json!({"httpMethod": "GET", "path": "/public", "headers": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(body_to_json(response.into_body()).await["outcome"], "none");
}

// == Stats & Health Endpoint Tests ==

#[tokio::test]
async fn test_stats_reflect_reads() {
    let (app, cache) = create_test_app();
    cache.set("/a", b"a".to_vec(), SetOptions::new()).await.unwrap();
    cache.get("/a").await;
    cache.get("/missing").await;

    let response = app.oneshot(get_request("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["build_id"], "build-1");
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["middleware_mode"], "disabled");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}
