//! Reference embedding of `authz-core`: wires the route registry, policy
//! enforcer, rate limiter, audit sink, and orchestrating middleware onto
//! axum.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use authz_core::audit::AuditSinkConfig;
use authz_core::lifecycle::Setup;
use authz_core::rate_limiter::{InMemoryRateLimiter, RateLimiterConfig};
use authz_core::{AuditSink, AuthorizationMiddleware, ManagementApi, PolicyEnforcer, RouteRegistry};
use authz_persistence::PostgresPersistenceAdapter;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::info;

pub mod auth_extractor;
pub mod config;
pub mod errors;
pub mod routes;
pub mod shutdown;
pub mod state;

use auth_extractor::BearerSubjectRoleExtractor;
use config::GatewayConfig;
use state::AppState;

/// Builds the shared application state and starts its background tasks.
/// Loads any persisted policy table into the enforcer before returning so
/// the first request sees a fully warmed-up authorization decision.
pub async fn build_application_state(
    cfg: &GatewayConfig,
    pool: PgPool,
) -> Result<(AppState, authz_core::lifecycle::Runtime)> {
    let registry = Arc::new(RouteRegistry::new());
    let enforcer = Arc::new(PolicyEnforcer::new());
    let management = Arc::new(ManagementApi::new(registry.clone(), enforcer.clone()));

    let persistence = Arc::new(PostgresPersistenceAdapter::new(pool));

    let (policies, groupings) = authz_core::ports::PersistenceAdapter::load_policy(persistence.as_ref())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("loading persisted policy table")?;
    enforcer.reload(policies.clone(), groupings);

    if cfg.validate_policies_on_init {
        let report = authz_core::policy::validate(&registry, &policies);
        if report.is_clean() {
            info!(warnings = report.warnings.len(), "policy validation passed at startup");
        } else {
            tracing::warn!(errors = ?report.errors, "policy validation found issues at startup");
        }
    }

    let audit = AuditSink::spawn(
        persistence,
        AuditSinkConfig {
            batch_size: cfg.audit_batch_size,
            flush_interval: cfg.audit_flush_interval(),
            ..AuditSinkConfig::default()
        },
    );

    let rate_limiter = Arc::new(InMemoryRateLimiter::new(RateLimiterConfig {
        default_rpm: cfg.default_rpm,
        burst_allowance: cfg.burst_allowance,
        ..RateLimiterConfig::default()
    }));

    let middleware = Arc::new(AuthorizationMiddleware::with_flags(
        registry.clone(),
        enforcer.clone(),
        rate_limiter.clone(),
        audit.clone(),
        Arc::new(BearerSubjectRoleExtractor),
        cfg.middleware_flags(),
    ));

    let runtime = Setup::start(
        rate_limiter,
        audit.clone(),
        authz_core::rate_limiter::DEFAULT_SWEEP_INTERVAL,
        authz_core::rate_limiter::DEFAULT_IDLE_THRESHOLD,
    );

    Ok((
        AppState {
            registry,
            enforcer,
            management,
            middleware,
            audit,
        },
        runtime,
    ))
}

pub async fn run(addr: SocketAddr) -> Result<()> {
    let cfg = GatewayConfig::from_env().context("loading gateway configuration")?;
    authz_core::telemetry::init_logging(cfg.log_format());

    info!("connecting to Postgres...");
    let pool = PgPool::connect(&cfg.database_url).await.context("connecting to the database")?;
    PostgresPersistenceAdapter::migrate(&pool)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("running authz-persistence migrations")?;

    let (app_state, mut runtime) = build_application_state(&cfg, pool).await?;

    info!("building routes...");
    let app = routes::build(app_state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to port {}", addr.port()))?;

    info!("authz-gateway listening on {addr}");

    let serve_result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await;

    runtime.shutdown().await;
    serve_result.context("server error")?;
    Ok(())
}
