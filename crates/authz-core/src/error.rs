use thiserror::Error;

/// Error taxonomy for the authorization core.
///
/// These are library-level errors; a consumer embedding this crate in an
/// HTTP server is expected to map them to status codes at its own boundary
/// (see `authz-gateway`'s `AppError` for the axum mapping used in this
/// workspace).
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: String, path: String },

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("rate limit exceeded, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request cancelled")]
    Cancelled,
}

pub type AuthzResult<T> = Result<T, AuthzError>;
