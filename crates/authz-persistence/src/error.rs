//! Maps `sqlx::Error` onto `authz_core::AuthzError` so every repository in
//! this crate reports failures the same way.

use authz_core::AuthzError;

pub fn map_sqlx(context: &str, err: sqlx::Error) -> AuthzError {
    AuthzError::TransientStore(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_the_sqlx_error_as_a_transient_store_failure() {
        let result = map_sqlx("insert audit decision record", sqlx::Error::RowNotFound);
        assert!(matches!(result, AuthzError::TransientStore(msg) if msg.contains("insert audit decision record")));
    }
}
