//! Environment-driven configuration via the `config` + `dotenvy` crates.
//! All keys are read under the `AUTHZ_` prefix.

use std::time::Duration;

use authz_core::ports::ConfigSource;
use authz_core::telemetry::LogFormat;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    pub database_url: String,

    #[serde(default = "default_default_rpm")]
    pub default_rpm: u32,

    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,

    #[serde(default = "default_audit_batch_size")]
    pub audit_batch_size: usize,

    #[serde(default = "default_audit_flush_interval_secs")]
    pub audit_flush_interval_secs: u64,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Audit allowed decisions even when a route doesn't request it.
    #[serde(default)]
    pub enable_audit_logging: bool,

    /// Master switch for rate limiting.
    #[serde(default = "default_true")]
    pub enable_rate_limit: bool,

    /// Master switch for deprecation warning headers.
    #[serde(default = "default_true")]
    pub enable_deprecation_check: bool,

    /// Let denied requests through with a logged warning instead of a 403.
    #[serde(default)]
    pub gradual_rollout_mode: bool,

    /// Let requests through for paths with no registered route.
    #[serde(default)]
    pub allow_missing_policies: bool,

    /// Validate the loaded policy table against the route registry at
    /// startup and log a report instead of failing silently on typos.
    #[serde(default)]
    pub validate_policies_on_init: bool,
}

fn default_port() -> u16 {
    8080
}
fn default_default_rpm() -> u32 {
    60
}
fn default_burst_allowance() -> u32 {
    0
}
fn default_audit_batch_size() -> usize {
    100
}
fn default_audit_flush_interval_secs() -> u64 {
    10
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_true() -> bool {
    true
}

impl GatewayConfig {
    /// Loads configuration from `AUTHZ_`-prefixed environment variables,
    /// falling back to a `.env` file in the working directory if present.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("AUTHZ")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        cfg.try_deserialize()
    }

    pub fn audit_flush_interval(&self) -> Duration {
        Duration::from_secs(self.audit_flush_interval_secs)
    }

    pub fn log_format(&self) -> LogFormat {
        match self.log_format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }

    pub fn middleware_flags(&self) -> authz_core::MiddlewareFlags {
        authz_core::MiddlewareFlags {
            enable_audit_logging: self.enable_audit_logging,
            enable_rate_limit: self.enable_rate_limit,
            enable_deprecation_check: self.enable_deprecation_check,
            gradual_rollout_mode: self.gradual_rollout_mode,
            allow_missing_policies: self.allow_missing_policies,
        }
    }
}

/// Adapts a loaded [`GatewayConfig`] to the `authz-core` [`ConfigSource`]
/// port, for callers (e.g. management handlers) that only need to read
/// configuration, not the whole typed struct.
pub struct EnvConfigSource {
    inner: GatewayConfig,
}

impl EnvConfigSource {
    pub fn new(inner: GatewayConfig) -> Self {
        Self { inner }
    }
}

impl ConfigSource for EnvConfigSource {
    fn get_string(&self, key: &str) -> authz_core::AuthzResult<String> {
        match key {
            "database_url" => Ok(self.inner.database_url.clone()),
            "log_format" => Ok(self.inner.log_format.clone()),
            other => Err(authz_core::AuthzError::Configuration(format!("unknown string config key: {other}"))),
        }
    }

    fn get_u32(&self, key: &str) -> authz_core::AuthzResult<u32> {
        match key {
            "port" => Ok(self.inner.port as u32),
            "default_rpm" => Ok(self.inner.default_rpm),
            "burst_allowance" => Ok(self.inner.burst_allowance),
            other => Err(authz_core::AuthzError::Configuration(format!("unknown u32 config key: {other}"))),
        }
    }

    fn get_bool(&self, key: &str) -> authz_core::AuthzResult<bool> {
        match key {
            "enable_audit_logging" => Ok(self.inner.enable_audit_logging),
            "enable_rate_limit" => Ok(self.inner.enable_rate_limit),
            "enable_deprecation_check" => Ok(self.inner.enable_deprecation_check),
            "gradual_rollout_mode" => Ok(self.inner.gradual_rollout_mode),
            "allow_missing_policies" => Ok(self.inner.allow_missing_policies),
            "validate_policies_on_init" => Ok(self.inner.validate_policies_on_init),
            other => Err(authz_core::AuthzError::Configuration(format!("unknown bool config key: {other}"))),
        }
    }
}
