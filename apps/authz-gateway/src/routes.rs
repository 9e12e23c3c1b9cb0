//! HTTP surface: a thin axum layer over `authz-core`, splitting route
//! wiring from handler logic.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use authz_core::route_registry::Method as AuthzMethod;
use authz_core::{AuthorizationState, RequestContext, RouteMetadata};

use crate::errors::AppError;
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics))
        .route("/admin/routes", get(list_routes).post(register_route))
        .route("/admin/routes/import", post(import_routes))
        .route("/admin/routes/{method}/{*path}", axum::routing::delete(delete_route))
        .route("/admin/roles", post(create_role))
        .route("/admin/roles/{role}", axum::routing::delete(delete_role))
        .route("/admin/roles/{role}/permissions", get(role_permissions))
        .route("/admin/roles/{role}/users", get(users_for_role))
        .route("/admin/users/{subject}/roles", get(roles_for_user).post(assign_role))
        .route("/admin/users/{subject}/roles/{role}", axum::routing::delete(remove_role))
        .fallback(authorize_fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn metrics() -> impl IntoResponse {
    match authz_core::telemetry::render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_routes(State(state): State<AppState>) -> impl IntoResponse {
    let routes: Vec<RouteMetadata> = state.registry.get_all().iter().map(|r| (**r).clone()).collect();
    Json(routes)
}

async fn register_route(State(state): State<AppState>, Json(route): Json<RouteMetadata>) -> Result<impl IntoResponse, AppError> {
    state.registry.register(route)?;
    Ok(StatusCode::CREATED)
}

async fn import_routes(State(state): State<AppState>, Json(routes): Json<Vec<RouteMetadata>>) -> Result<impl IntoResponse, AppError> {
    let report = state.management.import_routes(routes)?;
    Ok(Json(serde_json::json!({
        "imported": report.imported,
        "skipped_duplicates": report.skipped_duplicates,
    })))
}

async fn delete_route(State(state): State<AppState>, Path((method, path)): Path<(String, String)>) -> Result<impl IntoResponse, AppError> {
    let method = AuthzMethod::from_str(&method).map_err(AppError::from)?;
    let removed = state.management.delete_route(method, &format!("/{path}"))?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[derive(Deserialize)]
struct CreateRoleRequest {
    role: String,
}

async fn create_role(State(state): State<AppState>, Json(body): Json<CreateRoleRequest>) -> Result<impl IntoResponse, AppError> {
    state.management.create_role(&body.role)?;
    Ok(StatusCode::CREATED)
}

async fn delete_role(State(state): State<AppState>, Path(role): Path<String>) -> Result<impl IntoResponse, AppError> {
    state.management.delete_role(&role)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn role_permissions(State(state): State<AppState>, Path(role): Path<String>) -> impl IntoResponse {
    Json(state.management.get_role_permissions(&role))
}

async fn users_for_role(State(state): State<AppState>, Path(role): Path<String>) -> impl IntoResponse {
    Json(state.management.get_users_for_role(&role))
}

async fn roles_for_user(State(state): State<AppState>, Path(subject): Path<String>) -> impl IntoResponse {
    Json(state.management.get_roles_for_user(&subject))
}

#[derive(Deserialize)]
struct AssignRoleRequest {
    role: String,
}

async fn assign_role(State(state): State<AppState>, Path(subject): Path<String>, Json(body): Json<AssignRoleRequest>) -> impl IntoResponse {
    let created = state.management.assign_role_to_user(&subject, &body.role);
    (StatusCode::OK, Json(serde_json::json!({ "created": created })))
}

async fn remove_role(State(state): State<AppState>, Path((subject, role)): Path<(String, String)>) -> impl IntoResponse {
    let removed = state.management.remove_role_from_user(&subject, &role);
    Json(serde_json::json!({ "removed": removed }))
}

#[derive(Serialize)]
struct AuthorizedEnvelope {
    state: String,
    subject: Option<String>,
    role: Option<String>,
}

/// Every request not matched by an explicit admin/health/metrics route goes
/// through the full authorization pipeline. A real deployment would proxy
/// the request onward on an allowed outcome; this reference app just
/// reports the decision, since downstream dispatch is out of this crate's
/// scope.
async fn authorize_fallback(State(state): State<AppState>, headers: HeaderMap, req: axum::http::Request<axum::body::Body>) -> impl IntoResponse {
    let method = match AuthzMethod::from_str(req.method().as_str()) {
        Ok(m) => m,
        Err(_) => return (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response(),
    };
    let request_id = headers
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let raw_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());
    let source_ip = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let ctx = RequestContext {
        method,
        path: req.uri().path().to_string(),
        request_id,
        raw_token,
        source_ip,
    };

    let outcome = state.middleware.authorize(&ctx).await;
    let status = match outcome.state {
        AuthorizationState::Public
        | AuthorizationState::Allowed
        | AuthorizationState::AllowedDeprecated
        | AuthorizationState::WarningRollout
        | AuthorizationState::SoftMigrationAllowed => StatusCode::OK,
        AuthorizationState::AuthMissing => StatusCode::UNAUTHORIZED,
        AuthorizationState::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthorizationState::Denied => StatusCode::FORBIDDEN,
        AuthorizationState::NotFound => StatusCode::NOT_FOUND,
    };

    let mut response = (
        status,
        Json(AuthorizedEnvelope {
            state: format!("{:?}", outcome.state),
            subject: outcome.subject,
            role: outcome.role,
        }),
    )
        .into_response();

    for (name, value) in outcome.headers {
        if let Ok(header_value) = axum::http::HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, header_value);
        }
    }
    response
}
