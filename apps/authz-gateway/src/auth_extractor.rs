//! Reference `AuthenticationExtractor`: trusts a `Bearer <subject>:<role>`
//! token. Real deployments swap this for JWT/session verification; this
//! crate's job is the authorization pipeline downstream of authentication,
//! not how a subject is authenticated.

use async_trait::async_trait;
use authz_core::error::{AuthzError, AuthzResult};
use authz_core::ports::{AuthenticatedSubject, AuthenticationExtractor};

pub struct BearerSubjectRoleExtractor;

#[async_trait]
impl AuthenticationExtractor for BearerSubjectRoleExtractor {
    async fn extract(&self, request_id: &str, raw_token: Option<&str>) -> AuthzResult<AuthenticatedSubject> {
        let token = raw_token.ok_or_else(|| AuthzError::NotAuthenticated("missing bearer token".to_string()))?;
        let (subject_id, role) = token.split_once(':').ok_or_else(|| {
            AuthzError::NotAuthenticated(format!("request {request_id}: malformed token, expected 'subject:role'"))
        })?;
        if subject_id.is_empty() || role.is_empty() {
            return Err(AuthzError::NotAuthenticated(format!(
                "request {request_id}: token subject and role must both be non-empty"
            )));
        }
        Ok(AuthenticatedSubject {
            subject_id: subject_id.to_string(),
            role: role.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_subject_and_role_from_a_well_formed_token() {
        let extractor = BearerSubjectRoleExtractor;
        let subject = extractor.extract("req-1", Some("alice:staff")).await.unwrap();
        assert_eq!(subject.subject_id, "alice");
        assert_eq!(subject.role, "staff");
    }

    #[tokio::test]
    async fn missing_token_is_not_authenticated() {
        let extractor = BearerSubjectRoleExtractor;
        let err = extractor.extract("req-1", None).await.unwrap_err();
        assert!(matches!(err, AuthzError::NotAuthenticated(_)));
    }

    #[tokio::test]
    async fn malformed_token_is_not_authenticated() {
        let extractor = BearerSubjectRoleExtractor;
        let err = extractor.extract("req-1", Some("no-colon-here")).await.unwrap_err();
        assert!(matches!(err, AuthzError::NotAuthenticated(_)));
    }
}
