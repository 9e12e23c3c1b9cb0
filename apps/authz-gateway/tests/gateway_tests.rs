mod common;

use authz_core::route_registry::{Method, RouteMetadata};
use common::spawn_app;
use serde_json::json;

fn sample_route() -> RouteMetadata {
    RouteMetadata {
        path: "/orders".to_string(),
        method: Method::Get,
        is_public: false,
        allowed_roles: vec!["staff".to_string()],
        deprecated: false,
        deprecated_reason: String::new(),
        replaced_by: String::new(),
        api_version: "v1".to_string(),
        rate_limit: None,
        audit_required: true,
        ownership_check: false,
        tags: Default::default(),
        disable_normalization: false,
    }
}

#[tokio::test]
async fn health_check_reports_ok() {
    let app = spawn_app();
    let response = app.server.get("/healthz").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn registering_a_route_then_assigning_a_role_allows_the_request() {
    let app = spawn_app();

    app.server
        .post("/admin/routes")
        .json(&sample_route())
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    app.server
        .post("/admin/users/alice/roles")
        .json(&json!({ "role": "staff" }))
        .await
        .assert_status_ok();
    app.enforcer.add_policy("staff", "/orders", "GET");

    let response = app
        .server
        .get("/orders")
        .add_header(axum::http::header::AUTHORIZATION, "Bearer alice:staff")
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "Allowed");
}

#[tokio::test]
async fn request_without_bearer_token_is_unauthorized() {
    let app = spawn_app();

    app.server.post("/admin/routes").json(&sample_route()).await.assert_status(axum::http::StatusCode::CREATED);

    let response = app.server.get("/orders").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_without_a_matching_policy_is_forbidden() {
    let app = spawn_app();

    app.server.post("/admin/routes").json(&sample_route()).await.assert_status(axum::http::StatusCode::CREATED);

    let response = app
        .server
        .get("/orders")
        .add_header(axum::http::header::AUTHORIZATION, "Bearer bob:staff")
        .await;

    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unregistered_route_falls_through_as_not_found() {
    let app = spawn_app();
    let response = app
        .server
        .get("/no-such-route")
        .add_header(axum::http::header::AUTHORIZATION, "Bearer alice:staff")
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn role_lifecycle_endpoints_create_query_and_delete() {
    let app = spawn_app();

    app.server.post("/admin/roles").json(&json!({ "role": "staff" })).await.assert_status(axum::http::StatusCode::CREATED);

    app.server.post("/admin/users/alice/roles").json(&json!({ "role": "staff" })).await.assert_status_ok();

    let roles: Vec<String> = app.server.get("/admin/users/alice/roles").await.json();
    assert_eq!(roles, vec!["staff".to_string()]);

    app.server.delete("/admin/roles/staff").await.assert_status(axum::http::StatusCode::NO_CONTENT);

    let roles_after: Vec<String> = app.server.get("/admin/users/alice/roles").await.json();
    assert!(roles_after.is_empty());
}
