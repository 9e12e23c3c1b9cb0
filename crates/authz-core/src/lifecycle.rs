//! Owns the background tasks this crate spawns (rate limiter sweep, audit
//! batching worker) and ties their shutdown to one call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::rate_limiter::InMemoryRateLimiter;

/// Runtime handle returned by [`Setup::start`]. Dropping it does not stop
/// the background tasks; call [`Runtime::shutdown`] explicitly so the audit
/// sink gets its final synchronous flush.
pub struct Runtime {
    audit: AuditSink,
    sweep_stop: Arc<Notify>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Stops the sweep task and flushes/joins the audit sink. Safe to call
    /// more than once.
    pub async fn shutdown(&mut self) {
        self.sweep_stop.notify_waiters();
        if let Some(handle) = self.sweep_handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(%err, "rate limiter sweep task panicked during shutdown");
            }
        }
        self.audit.shutdown().await;
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }
}

/// Wires up and starts the background tasks the rest of the crate assumes
/// are running: the rate limiter's idle-bucket sweep and the audit sink's
/// batching worker.
pub struct Setup;

impl Setup {
    /// Spawns the sweep task on `sweep_interval` (default
    /// [`crate::rate_limiter::DEFAULT_SWEEP_INTERVAL`]) removing buckets
    /// idle past `idle_threshold` (default
    /// [`crate::rate_limiter::DEFAULT_IDLE_THRESHOLD`]), and returns a
    /// [`Runtime`] owning it plus the already-spawned `audit` sink.
    pub fn start(
        rate_limiter: Arc<InMemoryRateLimiter>,
        audit: AuditSink,
        sweep_interval: Duration,
        idle_threshold: Duration,
    ) -> Runtime {
        let stop = Arc::new(Notify::new());
        let task_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        rate_limiter.sweep(idle_threshold);
                    }
                    _ = task_stop.notified() => {
                        return;
                    }
                }
            }
        });

        Runtime {
            audit,
            sweep_stop: stop,
            sweep_handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSinkConfig;
    use crate::error::AuthzResult;
    use crate::ports::PersistenceAdapter;
    use crate::rate_limiter::RateLimiterConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct NoopAdapter;

    #[async_trait]
    impl PersistenceAdapter for NoopAdapter {
        async fn save_batch(&self, _records: &[crate::audit::DecisionRecord]) -> AuthzResult<()> {
            Ok(())
        }
        async fn find_all(&self, _limit: u32, _offset: u32) -> AuthzResult<Vec<crate::audit::DecisionRecord>> {
            Ok(vec![])
        }
        async fn find_by_subject(&self, _s: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<crate::audit::DecisionRecord>> {
            Ok(vec![])
        }
        async fn find_by_resource(&self, _r: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<crate::audit::DecisionRecord>> {
            Ok(vec![])
        }
        async fn find_by_time_range(&self, _f: DateTime<Utc>, _t: DateTime<Utc>, _limit: u32, _offset: u32) -> AuthzResult<Vec<crate::audit::DecisionRecord>> {
            Ok(vec![])
        }
        async fn count(&self) -> AuthzResult<u64> {
            Ok(0)
        }
        async fn cleanup_old_logs(&self, _older_than: DateTime<Utc>) -> AuthzResult<u64> {
            Ok(0)
        }
        async fn load_policy(&self) -> AuthzResult<(Vec<crate::policy::PolicyRule>, Vec<crate::policy::GroupingRule>)> {
            Ok((vec![], vec![]))
        }
        async fn save_policy(&self, _p: &[crate::policy::PolicyRule], _g: &[crate::policy::GroupingRule]) -> AuthzResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_and_shutdown_completes_cleanly() {
        let rate_limiter = Arc::new(InMemoryRateLimiter::new(RateLimiterConfig::default()));
        let audit = AuditSink::spawn(Arc::new(NoopAdapter), AuditSinkConfig::default());
        let mut runtime = Setup::start(rate_limiter, audit, Duration::from_millis(20), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.shutdown().await;
    }
}
