//! Maps `authz_core::AuthzError` onto HTTP responses: a single `AppError`
//! that wraps the underlying error via `#[from]` and, in its
//! `IntoResponse` impl, logs internal errors while hiding their detail
//! from the client.

use authz_core::AuthzError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Authz(AuthzError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Authz(AuthzError::DuplicateRoute { method, path }) => (
                StatusCode::CONFLICT,
                format!("route already registered: {method} {path}"),
            ),
            AppError::Authz(AuthzError::NotAuthenticated(msg)) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Authz(AuthzError::NotAuthorized) => (StatusCode::FORBIDDEN, "not authorized".to_string()),
            AppError::Authz(AuthzError::RateLimited { retry_after_s }) => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("rate limited, retry after {retry_after_s}s"),
            ),
            AppError::Authz(AuthzError::Configuration(msg)) => {
                tracing::error!(%msg, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal configuration error".to_string())
            }
            AppError::Authz(AuthzError::TransientStore(msg)) => {
                tracing::error!(%msg, "transient store error");
                (StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable".to_string())
            }
            AppError::Authz(AuthzError::Cancelled) => (StatusCode::SERVICE_UNAVAILABLE, "request cancelled".to_string()),
            AppError::Anyhow(err) => {
                tracing::error!(?err, "unhandled internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
