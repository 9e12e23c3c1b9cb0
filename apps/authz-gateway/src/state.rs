//! `AppState`: the shared handle axum clones into every handler.

use std::sync::Arc;

use authz_core::{AuditSink, AuthorizationMiddleware, ManagementApi, PolicyEnforcer, RouteRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RouteRegistry>,
    pub enforcer: Arc<PolicyEnforcer>,
    pub management: Arc<ManagementApi>,
    pub middleware: Arc<AuthorizationMiddleware>,
    pub audit: AuditSink,
}
