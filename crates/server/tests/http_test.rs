mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;
use vibe_builder_server::build_router;

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, value)
}

async fn register(app: &Router, name: &str) -> (String, String) {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "email": format!("{}@example.com", name.to_lowercase()),
            "name": name,
            "password": "correct horse battery",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_check_responds() {
    let app = setup().await;
    let router = build_router(app.state.clone());

    let (status, body) = send(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn register_login_and_fetch_profile() {
    let app = setup().await;
    let router = build_router(app.state.clone());

    let (token, user_id) = register(&router, "Alice").await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "ALICE@example.com", "password": "correct horse battery" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], user_id.as_str());

    let (status, body) = send(&router, Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["effective_tier"], "free");
    assert_eq!(body["usage"]["monthly_limit"], 3);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_is_recorded_in_the_activity_log() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    let (token, user_id) = register(&router, "Alice").await;

    let (status, body) = send(&router, Method::GET, "/api/activity", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["action"], "user.registered");
    assert_eq!(body["items"][0]["actor_user_id"], user_id.as_str());
    assert_eq!(body["items"][0]["resource_id"], user_id.as_str());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    register(&router, "Alice").await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "email": "Alice@Example.com",
            "name": "Alice Again",
            "password": "another password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn signed_in_routes_reject_missing_or_bad_tokens() {
    let app = setup().await;
    let router = build_router(app.state.clone());

    let (status, body) = send(&router, Method::GET, "/api/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&router, Method::GET, "/api/projects", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anonymous_callers_can_browse_templates() {
    let app = setup().await;
    let router = build_router(app.state.clone());

    let (status, body) = send(&router, Method::GET, "/api/templates?q=crm", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert!(body["items"].as_array().unwrap().is_empty());
    assert!(body["facets"]["category"].is_object());
}

#[tokio::test]
async fn unknown_enum_values_are_validation_errors() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    let (token, _) = register(&router, "Alice").await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/projects/generate",
        Some(&token),
        Some(json!({ "app_idea": "A todo app", "frontend_stack": "cobol" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn bad_query_filters_are_validation_errors() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    let (token, _) = register(&router, "Alice").await;

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/projects?status=bogus",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["field"], "query");

    let (status, body) = send(&router, Method::GET, "/api/templates?limit=lots", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/activity?offset=first",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn generation_over_http() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    let (token, user_id) = register(&router, "Alice").await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/projects/generate",
        Some(&token),
        Some(json!({ "app_idea": "A habit tracker", "frontend_stack": "react" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["project"]["status"], "generated");
    assert_eq!(body["usage"]["monthly_generations"], 1);

    let project_id = body["project"]["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/projects/{project_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner_id"], user_id.as_str());

    // Private projects look missing to anonymous callers.
    let (status, _) = send(
        &router,
        Method::GET,
        &format!("/api/projects/{project_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exhausted_quota_is_too_many_requests() {
    let app = setup().await;
    let router = build_router(app.state.clone());
    let (token, user_id) = register(&router, "Alice").await;
    set_generations_this_month(&app.state, &user_id, 3).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/projects/generate",
        Some(&token),
        Some(json!({ "app_idea": "One more app", "frontend_stack": "vue" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["limit"], 3);
    assert_eq!(body["current"], 3);
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn unknown_routes_are_json_not_found() {
    let app = setup().await;
    let router = build_router(app.state.clone());

    let (status, body) = send(&router, Method::GET, "/api/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
