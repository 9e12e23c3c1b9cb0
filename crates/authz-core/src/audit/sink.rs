//! `AuditSink`: batches [`DecisionRecord`]s into a dedicated background
//! worker instead of spawning one task per record. `record()` never awaits
//! the store; it only ever touches a bounded in-process channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::audit::records::DecisionRecord;
use crate::error::{AuthzError, AuthzResult};
use crate::ports::PersistenceAdapter;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct AuditSinkConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for AuditSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle held by the middleware / management API. Cloning is cheap: the
/// sender is an `mpsc::Sender`, and the worker join handle lives behind the
/// single owner that calls [`AuditSink::shutdown`].
#[derive(Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<DecisionRecord>,
    adapter: Arc<dyn PersistenceAdapter>,
    shutdown: Arc<AsyncMutex<Option<oneshot::Sender<()>>>>,
    worker: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
}

impl AuditSink {
    /// Spawns the background batching worker and returns a handle to it.
    pub fn spawn(adapter: Arc<dyn PersistenceAdapter>, config: AuditSinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker_adapter = adapter.clone();
        let handle = tokio::spawn(run_worker(rx, worker_adapter, config, shutdown_rx));
        Self {
            sender: tx,
            adapter,
            shutdown: Arc::new(AsyncMutex::new(Some(shutdown_tx))),
            worker: Arc::new(AsyncMutex::new(Some(handle))),
        }
    }

    /// Enqueues a record without blocking on the store. Returns an error
    /// only if the channel is full (the consumer is falling behind) or
    /// closed (the worker has already shut down).
    pub fn record(&self, record: DecisionRecord) -> AuthzResult<()> {
        self.sender.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("audit sink channel full, dropping record");
                AuthzError::TransientStore("audit channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AuthzError::TransientStore("audit sink worker has shut down".to_string())
            }
        })
    }

    pub async fn find_all(&self, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.adapter.find_all(limit, offset).await
    }

    pub async fn find_by_subject(&self, subject: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.adapter.find_by_subject(subject, limit, offset).await
    }

    pub async fn find_by_resource(&self, resource: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.adapter.find_by_resource(resource, limit, offset).await
    }

    pub async fn find_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> AuthzResult<Vec<DecisionRecord>> {
        self.adapter.find_by_time_range(from, to, limit, offset).await
    }

    pub async fn count(&self) -> AuthzResult<u64> {
        self.adapter.count().await
    }

    pub async fn cleanup_old_logs(&self, older_than: DateTime<Utc>) -> AuthzResult<u64> {
        self.adapter.cleanup_old_logs(older_than).await
    }

    /// Signals the worker to stop, wait for it to drain and flush whatever
    /// it was holding, and join it. Idempotent: a second call is a no-op.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(%err, "audit sink worker panicked during shutdown");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<DecisionRecord>,
    adapter: Arc<dyn PersistenceAdapter>,
    config: AuditSinkConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buffer = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= config.batch_size {
                            flush(&adapter, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&adapter, &mut buffer).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&adapter, &mut buffer).await;
            }
            _ = &mut shutdown_rx => {
                while let Ok(record) = rx.try_recv() {
                    buffer.push(record);
                }
                flush(&adapter, &mut buffer).await;
                return;
            }
        }
    }
}

async fn flush(adapter: &Arc<dyn PersistenceAdapter>, buffer: &mut Vec<DecisionRecord>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = adapter.save_batch(buffer).await {
        tracing::error!(%err, count = buffer.len(), "failed to flush audit batch");
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::records::Decision;
    use crate::policy::{GroupingRule, PolicyRule};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingAdapter {
        saved: StdMutex<Vec<DecisionRecord>>,
    }

    #[async_trait]
    impl PersistenceAdapter for RecordingAdapter {
        async fn save_batch(&self, records: &[DecisionRecord]) -> AuthzResult<()> {
            self.saved.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
        async fn find_all(&self, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
            Ok(self.saved.lock().unwrap().clone())
        }
        async fn find_by_subject(&self, _subject: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
            Ok(vec![])
        }
        async fn find_by_resource(&self, _resource: &str, _limit: u32, _offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
            Ok(vec![])
        }
        async fn find_by_time_range(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _limit: u32,
            _offset: u32,
        ) -> AuthzResult<Vec<DecisionRecord>> {
            Ok(vec![])
        }
        async fn count(&self) -> AuthzResult<u64> {
            Ok(self.saved.lock().unwrap().len() as u64)
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

    fn sample_record() -> DecisionRecord {
        DecisionRecord::builder("GET", "/accounts/:id", Decision::Allowed)
            .subject("user-1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn records_are_flushed_on_shutdown() {
        let adapter = Arc::new(RecordingAdapter::default());
        let sink = AuditSink::spawn(
            adapter.clone(),
            AuditSinkConfig {
                batch_size: 100,
                flush_interval: Duration::from_secs(600),
                channel_capacity: 16,
            },
        );
        sink.record(sample_record()).unwrap();
        sink.record(sample_record()).unwrap();
        sink.shutdown().await;
        assert_eq!(adapter.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_size_trigger_flushes_without_waiting_for_interval() {
        let adapter = Arc::new(RecordingAdapter::default());
        let sink = AuditSink::spawn(
            adapter.clone(),
            AuditSinkConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(600),
                channel_capacity: 16,
            },
        );
        sink.record(sample_record()).unwrap();
        sink.record(sample_record()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(adapter.saved.lock().unwrap().len(), 2);
        sink.shutdown().await;
    }
}
