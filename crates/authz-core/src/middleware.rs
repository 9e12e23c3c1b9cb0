//! `AuthorizationMiddleware`: the orchestrator wiring `RouteRegistry`,
//! `PolicyEnforcer`, rate limiting, and the audit sink into a single
//! per-request pipeline. Framework-agnostic: the HTTP adaptation
//! (extracting `RequestContext` from an axum request, writing headers back
//! onto the response) lives in `authz-gateway`, keeping this pipeline thin
//! over the ports it depends on.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditSink, Decision, DecisionRecord};
use crate::path_normalizer::normalize;
use crate::policy::PolicyEnforcer;
use crate::ports::AuthenticationExtractor;
use crate::rate_limiter::RateLimiterBackend;
use crate::route_registry::{Method, RouteMetadata, RouteRegistry};

/// Feature flags sourced from the embedding application's `ConfigSource`,
/// controlling which optional pipeline behaviors are active.
#[derive(Debug, Clone, Copy)]
pub struct MiddlewareFlags {
    /// Audit allowed decisions even when the route doesn't set
    /// `audit_required`. Denials are always audited regardless of this flag.
    pub enable_audit_logging: bool,
    /// Master switch for rate limiting; a route's own `rate_limit` must
    /// still be set for limiting to apply to that route.
    pub enable_rate_limit: bool,
    /// Master switch for the deprecation warning headers.
    pub enable_deprecation_check: bool,
    /// When the policy check denies a request, log a warning and let it
    /// through instead of returning a 403 — for rolling out a new policy
    /// table without locking users out of routes it doesn't cover yet.
    pub gradual_rollout_mode: bool,
    /// When a request's path matches no registered route, let it through
    /// instead of returning not-found — for migrating an app onto this
    /// framework route by route instead of all at once.
    pub allow_missing_policies: bool,
}

impl Default for MiddlewareFlags {
    fn default() -> Self {
        Self {
            enable_audit_logging: false,
            enable_rate_limit: true,
            enable_deprecation_check: true,
            gradual_rollout_mode: false,
            allow_missing_policies: false,
        }
    }
}

/// Everything the middleware needs to know about one inbound request. Built
/// by the HTTP adapter from the real request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub request_id: String,
    pub raw_token: Option<String>,
    pub source_ip: Option<String>,
}

/// A single response header the HTTP adapter should set. Kept as plain
/// strings rather than a `http::HeaderMap` so this crate has no direct
/// dependency on the web framework's header types.
pub type ResponseHeader = (&'static str, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationState {
    /// Route has no authentication/authorization requirement.
    Public,
    /// Route requires authentication and none was presented, or the token
    /// was rejected by the `AuthenticationExtractor`.
    AuthMissing,
    /// The subject's request rate exceeded its bucket.
    RateLimited,
    /// Subject authenticated but the role/policy check failed.
    Denied,
    /// Route not found in the registry.
    NotFound,
    /// Authenticated, authorized, route is current.
    Allowed,
    /// Authenticated, authorized, but the route is marked deprecated.
    AllowedDeprecated,
    /// Policy check denied the request, but `gradual_rollout_mode` let it
    /// through anyway; the denial was logged as a warning.
    WarningRollout,
    /// No registered route matched, but `allow_missing_policies` let the
    /// request through to the downstream handler.
    SoftMigrationAllowed,
}

#[derive(Debug, Clone)]
pub struct AuthorizationOutcome {
    pub state: AuthorizationState,
    pub subject: Option<String>,
    pub role: Option<String>,
    pub reason: String,
    pub headers: Vec<ResponseHeader>,
}

impl AuthorizationOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self.state,
            AuthorizationState::Public
                | AuthorizationState::Allowed
                | AuthorizationState::AllowedDeprecated
                | AuthorizationState::WarningRollout
                | AuthorizationState::SoftMigrationAllowed
        )
    }
}

pub struct AuthorizationMiddleware {
    registry: Arc<RouteRegistry>,
    enforcer: Arc<PolicyEnforcer>,
    rate_limiter: Arc<dyn RateLimiterBackend>,
    audit: AuditSink,
    extractor: Arc<dyn AuthenticationExtractor>,
    flags: MiddlewareFlags,
}

impl AuthorizationMiddleware {
    pub fn new(
        registry: Arc<RouteRegistry>,
        enforcer: Arc<PolicyEnforcer>,
        rate_limiter: Arc<dyn RateLimiterBackend>,
        audit: AuditSink,
        extractor: Arc<dyn AuthenticationExtractor>,
    ) -> Self {
        Self::with_flags(registry, enforcer, rate_limiter, audit, extractor, MiddlewareFlags::default())
    }

    pub fn with_flags(
        registry: Arc<RouteRegistry>,
        enforcer: Arc<PolicyEnforcer>,
        rate_limiter: Arc<dyn RateLimiterBackend>,
        audit: AuditSink,
        extractor: Arc<dyn AuthenticationExtractor>,
        flags: MiddlewareFlags,
    ) -> Self {
        Self {
            registry,
            enforcer,
            rate_limiter,
            audit,
            extractor,
            flags,
        }
    }

    /// Runs the full pipeline for one request. Never panics: every
    /// collaborator failure degrades to a deny with a logged reason.
    pub async fn authorize(&self, ctx: &RequestContext) -> AuthorizationOutcome {
        let start = Instant::now();
        let mut headers = vec![("X-Request-ID", ctx.request_id.clone())];

        let Some(route) = self.registry.get(&ctx.path, ctx.method) else {
            if self.flags.allow_missing_policies {
                headers.push(("X-Authorization-Mode", "SOFT_MIGRATION".to_string()));
                let outcome = AuthorizationOutcome {
                    state: AuthorizationState::SoftMigrationAllowed,
                    subject: None,
                    role: None,
                    reason: "no registered route; allowed through under soft migration".to_string(),
                    headers,
                };
                self.record(ctx, &outcome, None, start).await;
                return outcome;
            }
            let outcome = AuthorizationOutcome {
                state: AuthorizationState::NotFound,
                subject: None,
                role: None,
                reason: "no registered route".to_string(),
                headers,
            };
            self.record(ctx, &outcome, None, start).await;
            return outcome;
        };

        if route.deprecated && self.flags.enable_deprecation_check {
            headers.push(("X-API-Warn", "deprecated".to_string()));
            headers.push(("X-API-Deprecation-Use-Instead", route.replaced_by.clone()));
        }

        if route.is_public {
            headers.push(("X-Authorization-Mode", "PUBLIC".to_string()));
            let outcome = AuthorizationOutcome {
                state: AuthorizationState::Public,
                subject: None,
                role: None,
                reason: "public route".to_string(),
                headers,
            };
            self.record_if_required(ctx, &outcome, Some(&route), start).await;
            return outcome;
        }

        let subject = match self.extractor.extract(&ctx.request_id, ctx.raw_token.as_deref()).await {
            Ok(subject) => subject,
            Err(err) => {
                let outcome = AuthorizationOutcome {
                    state: AuthorizationState::AuthMissing,
                    subject: None,
                    role: None,
                    reason: err.to_string(),
                    headers,
                };
                self.record(ctx, &outcome, Some(&route), start).await;
                return outcome;
            }
        };

        if self.flags.enable_rate_limit {
            if let Some(route_limit) = route.rate_limit.as_ref() {
                let rate_decision = self
                    .rate_limiter
                    .check(&subject.subject_id, &subject.role, Some(route_limit))
                    .await;
                match rate_decision {
                    Ok(decision) => {
                        headers.push(("X-Rate-Limit-Remaining", decision.remaining.to_string()));
                        headers.push(("X-Rate-Limit-Reset", decision.reset_at_unix.to_string()));
                        if !decision.allowed {
                            headers.push(("Retry-After", decision.retry_after_s.to_string()));
                            let outcome = AuthorizationOutcome {
                                state: AuthorizationState::RateLimited,
                                subject: Some(subject.subject_id.clone()),
                                role: Some(subject.role.clone()),
                                reason: "rate limit exceeded".to_string(),
                                headers,
                            };
                            self.record(ctx, &outcome, Some(&route), start).await;
                            return outcome;
                        }
                    }
                    Err(err) => {
                        // Rate-limiter errors fail open: log and continue to
                        // the policy check rather than denying the request.
                        tracing::error!(%err, "rate limiter backend failed; continuing to enforcement (fail-open)");
                    }
                }
            }
        }

        if !route.allowed_roles.iter().any(|r| r == &subject.role) {
            headers.push(("X-Authorization-Mode", "CASBIN_V2".to_string()));
            let outcome = AuthorizationOutcome {
                state: AuthorizationState::Denied,
                subject: Some(subject.subject_id.clone()),
                role: Some(subject.role.clone()),
                reason: format!("role '{}' is not in the route's allowed_roles", subject.role),
                headers,
            };
            self.record(ctx, &outcome, Some(&route), start).await;
            return outcome;
        }

        let resource = route.normalized_path();
        let method = route.method.to_string();
        if !self.enforcer.enforce(&subject.subject_id, &resource, &method) {
            if self.flags.gradual_rollout_mode {
                tracing::warn!(
                    subject = %subject.subject_id,
                    resource = %resource,
                    "policy denied this request but gradual_rollout_mode let it through"
                );
                headers.push(("X-Authorization-Mode", "GRADUAL_ROLLOUT".to_string()));
                let outcome = AuthorizationOutcome {
                    state: AuthorizationState::WarningRollout,
                    subject: Some(subject.subject_id.clone()),
                    role: Some(subject.role.clone()),
                    reason: "policy denied access; allowed through under gradual rollout".to_string(),
                    headers,
                };
                self.record(ctx, &outcome, Some(&route), start).await;
                return outcome;
            }
            headers.push(("X-Authorization-Mode", "CASBIN_V2".to_string()));
            let outcome = AuthorizationOutcome {
                state: AuthorizationState::Denied,
                subject: Some(subject.subject_id.clone()),
                role: Some(subject.role.clone()),
                reason: "no policy grants this subject access".to_string(),
                headers,
            };
            self.record(ctx, &outcome, Some(&route), start).await;
            return outcome;
        }

        headers.push(("X-Authorization-Mode", "CASBIN_V2".to_string()));
        let state = if route.deprecated {
            AuthorizationState::AllowedDeprecated
        } else {
            AuthorizationState::Allowed
        };
        let outcome = AuthorizationOutcome {
            state,
            subject: Some(subject.subject_id.clone()),
            role: Some(subject.role.clone()),
            reason: "allowed".to_string(),
            headers,
        };
        self.record_if_required(ctx, &outcome, Some(&route), start).await;
        outcome
    }

    /// Records every non-allowed decision unconditionally (security-relevant
    /// events are never opt-in), and allowed decisions only when the route
    /// requests it via `audit_required`.
    async fn record_if_required(
        &self,
        ctx: &RequestContext,
        outcome: &AuthorizationOutcome,
        route: Option<&RouteMetadata>,
        start: Instant,
    ) {
        if outcome.is_allowed()
            && !self.flags.enable_audit_logging
            && !route.map(|r| r.audit_required).unwrap_or(false)
        {
            return;
        }
        self.record(ctx, outcome, route, start).await;
    }

    async fn record(
        &self,
        ctx: &RequestContext,
        outcome: &AuthorizationOutcome,
        route: Option<&RouteMetadata>,
        start: Instant,
    ) {
        let decision = match outcome.state {
            AuthorizationState::Public
            | AuthorizationState::Allowed
            | AuthorizationState::AllowedDeprecated
            | AuthorizationState::WarningRollout
            | AuthorizationState::SoftMigrationAllowed => Decision::Allowed,
            AuthorizationState::RateLimited => Decision::RateLimited,
            AuthorizationState::AuthMissing | AuthorizationState::NotFound => Decision::Error,
            AuthorizationState::Denied => Decision::Denied,
        };
        let method = route.map(|r| r.method.to_string()).unwrap_or_else(|| ctx.method.to_string());
        let resource = route
            .map(|r| r.normalized_path())
            .unwrap_or_else(|| normalize(&ctx.path));
        let mut builder = DecisionRecord::builder(method, resource, decision)
            .reason(outcome.reason.clone())
            .request_id(ctx.request_id.clone())
            .duration_ms(start.elapsed().as_millis().min(u32::MAX as u128) as u32);
        if let Some(subject) = &outcome.subject {
            builder = builder.subject(subject.clone());
        }
        if let Some(role) = &outcome.role {
            builder = builder.role(role.clone());
        }
        if let Some(ip) = &ctx.source_ip {
            builder = builder.source_ip(ip.clone());
        }
        match builder.build() {
            Ok(record) => {
                if let Err(err) = self.audit.record(record) {
                    tracing::warn!(%err, "failed to enqueue audit record");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to build audit record"),
        }
    }
}
