use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use authz_core::audit::{AuditSink, AuditSinkConfig, DecisionRecord};
use authz_core::error::AuthzResult;
use authz_core::policy::{GroupingRule, PolicyEnforcer, PolicyRule};
use authz_core::ports::{AuthenticatedSubject, AuthenticationExtractor, PersistenceAdapter};
use authz_core::rate_limiter::{InMemoryRateLimiter, RateLimiterConfig};
use authz_core::{AuthorizationMiddleware, ManagementApi, RouteRegistry};
use authz_gateway::routes;
use authz_gateway::state::AppState;
use axum_test::TestServer;
use chrono::{DateTime, Utc};

/// In-process stand-in for `authz-persistence`'s Postgres adapter so these
/// tests exercise the full HTTP surface without a database.
#[derive(Default)]
pub struct InMemoryPersistenceAdapter {
    records: StdMutex<Vec<DecisionRecord>>,
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistenceAdapter {
    async fn save_batch(&self, records: &[DecisionRecord]) -> AuthzResult<()> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
    async fn find_all(&self, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
    async fn find_by_subject(&self, subject: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        Ok(self.records.lock().unwrap().iter().filter(|r| r.subject == subject).cloned().collect())
    }
    async fn find_by_resource(&self, resource: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        Ok(self.records.lock().unwrap().iter().filter(|r| r.resource == resource).cloned().collect())
    }
    async fn find_by_time_range(&self, _from: DateTime<Utc>, _to: DateTime<Utc>, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
    async fn count(&self) -> AuthzResult<u64> {
        Ok(self.records.lock().unwrap().len() as u64)
    }
    async fn cleanup_old_logs(&self, _older_than: DateTime<Utc>) -> AuthzResult<u64> {
        Ok(0)
    }
    async fn load_policy(&self) -> AuthzResult<(Vec<PolicyRule>, Vec<GroupingRule>)> {
        Ok((vec![], vec![]))
    }
    async fn save_policy(&self, _policies: &[PolicyRule], _groupings: &[GroupingRule]) -> AuthzResult<()> {
        Ok(())
    }
}

/// Trusts a `Bearer <subject>:<role>` token, the same contract as
/// `authz_gateway::auth_extractor::BearerSubjectRoleExtractor`, reimplemented
/// here so the test binary doesn't need that module's pub(crate) internals.
pub struct TestExtractor;

#[async_trait]
impl AuthenticationExtractor for TestExtractor {
    async fn extract(&self, request_id: &str, raw_token: Option<&str>) -> AuthzResult<AuthenticatedSubject> {
        let token = raw_token.ok_or_else(|| authz_core::error::AuthzError::NotAuthenticated("missing bearer token".to_string()))?;
        let (subject_id, role) = token.split_once(':').ok_or_else(|| {
            authz_core::error::AuthzError::NotAuthenticated(format!("request {request_id}: malformed token"))
        })?;
        Ok(AuthenticatedSubject {
            subject_id: subject_id.to_string(),
            role: role.to_string(),
        })
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub enforcer: Arc<PolicyEnforcer>,
}

pub fn spawn_app() -> TestApp {
    let registry = Arc::new(RouteRegistry::new());
    let enforcer = Arc::new(PolicyEnforcer::new());
    let management = Arc::new(ManagementApi::new(registry.clone(), enforcer.clone()));

    let persistence = Arc::new(InMemoryPersistenceAdapter::default());
    let audit = AuditSink::spawn(persistence, AuditSinkConfig::default());

    let rate_limiter = Arc::new(InMemoryRateLimiter::new(RateLimiterConfig::default()));

    let middleware = Arc::new(AuthorizationMiddleware::new(
        registry.clone(),
        enforcer.clone(),
        rate_limiter,
        audit.clone(),
        Arc::new(TestExtractor),
    ));

    let enforcer_handle = enforcer.clone();

    let state = AppState {
        registry,
        enforcer,
        management,
        middleware,
        audit,
    };

    let app = routes::build(state);
    let server = TestServer::new(app).expect("failed to build test server");

    TestApp { server, enforcer: enforcer_handle }
}
