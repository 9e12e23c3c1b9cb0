//! Structured logging init and ambient Prometheus metrics. These are
//! operational metrics (decision counts, rate-limit checks, flush
//! latency), distinct from any business-facing usage analytics.

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initializes the global `tracing` subscriber. Call once at process start;
/// a second call is a harmless no-op (subsequent `try_init` failures are
/// swallowed, since test harnesses may call this more than once).
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}

lazy_static! {
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref AUTHORIZATION_DECISIONS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            prometheus::Opts::new(
                "authz_decisions_total",
                "Authorization decisions by outcome state",
            ),
            &["state"],
        )
        .expect("metric names/labels are static and valid");
        METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric is only registered once");
        counter
    };

    pub static ref RATE_LIMIT_CHECKS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            prometheus::Opts::new(
                "authz_rate_limit_checks_total",
                "Rate limiter checks by outcome",
            ),
            &["allowed"],
        )
        .expect("metric names/labels are static and valid");
        METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric is only registered once");
        counter
    };

    pub static ref AUDIT_FLUSH_DURATION_SECONDS: HistogramVec = {
        let histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "authz_audit_flush_duration_seconds",
                "Time spent flushing a batch of audit records to the store",
            ),
            &["outcome"],
        )
        .expect("metric names/labels are static and valid");
        METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("metric is only registered once");
        histogram
    };
}

/// Renders the process's metrics in the Prometheus text exposition format,
/// for a `/metrics` handler in `authz-gateway`.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_without_error() {
        AUTHORIZATION_DECISIONS_TOTAL.with_label_values(&["ALLOWED"]).inc();
        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("authz_decisions_total"));
    }
}
