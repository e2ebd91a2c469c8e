//! Liveness heartbeat.
//!
//! Refreshes this process's heartbeat record on a fixed cadence. The first
//! beat is written before `start` returns. Peers reclaim tasks of a process whose record expired, so a
//! failed refresh is fatal: the loop records the error in `Shutdown` and
//! cancels the root token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::ProcessId;
use crate::error::TallyError;
use crate::ports::Store;

/// Root cancellation plus the fatal error that caused it, if any.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fatal: Arc<Mutex<Option<TallyError>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Orderly stop, no error.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stops the process because of `err`. Only the first error is kept.
    pub fn fail(&self, err: TallyError) {
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.token.cancel();
    }

    pub fn take_fatal(&self) -> Option<TallyError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Heartbeat {
    process_id: ProcessId,
    store: Arc<dyn Store>,
    interval: Duration,
    ttl: Duration,
}

impl Heartbeat {
    pub fn new(process_id: ProcessId, store: Arc<dyn Store>, interval: Duration, ttl: Duration) -> Self {
        Self {
            process_id,
            store,
            interval,
            ttl,
        }
    }

    /// Writes the first beat and, once it is stored, spawns the periodic
    /// refresh. Returns false when the first beat failed; the error is then
    /// already recorded in `shutdown`.
    ///
    /// Claims must wait for this: a claim whose owner has no heartbeat record
    /// is fair game for any peer.
    pub async fn start(self, shutdown: Shutdown) -> bool {
        if !self.beat(&shutdown).await {
            return false;
        }
        info!(
            process_id = %self.process_id,
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.ttl.as_secs(),
            "heartbeat started"
        );
        tokio::spawn(self.refresh_loop(shutdown));
        true
    }

    async fn refresh_loop(self, shutdown: Shutdown) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.token().cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.beat(&shutdown).await {
                break;
            }
        }
        debug!(process_id = %self.process_id, "heartbeat stopped");
    }

    async fn beat(&self, shutdown: &Shutdown) -> bool {
        match self.store.set_heartbeat(&self.process_id, self.ttl).await {
            Ok(created) => {
                debug!(process_id = %self.process_id, created, "heartbeat refreshed");
                true
            }
            Err(err) => {
                error!(process_id = %self.process_id, error = %err, "heartbeat refresh failed, shutting down");
                shutdown.fail(TallyError::Liveness(format!(
                    "refreshing heartbeat of {}: {err}",
                    self.process_id
                )));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metric, MetricKey, Metrics, TaskType};
    use crate::error::{ErrorKind, StoreError};
    use crate::ports::SystemClock;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose heartbeat starts failing after `ok_beats` refreshes.
    struct FlakyHeartbeatStore {
        inner: LocalStore,
        beats: AtomicU32,
        ok_beats: u32,
    }

    #[async_trait]
    impl Store for FlakyHeartbeatStore {
        async fn metrics(&self) -> Result<Metrics, StoreError> {
            self.inner.metrics().await
        }
        async fn set_metric(&self, metric: Metric) -> Result<(), StoreError> {
            self.inner.set_metric(metric).await
        }
        async fn get_metric(&self, key: &MetricKey) -> Result<Option<Metric>, StoreError> {
            self.inner.get_metric(key).await
        }
        async fn del_metric(&self, key: &MetricKey) -> Result<(), StoreError> {
            self.inner.del_metric(key).await
        }
        async fn metric_exists(&self, key: &MetricKey) -> Result<bool, StoreError> {
            self.inner.metric_exists(key).await
        }
        async fn metrics_count(&self) -> Result<u64, StoreError> {
            self.inner.metrics_count().await
        }
        async fn queue_task(&self, t: &TaskType, i: &str, p: &ProcessId) -> Result<bool, StoreError> {
            self.inner.queue_task(t, i, p).await
        }
        async fn unqueue_task(&self, t: &TaskType, i: &str) -> Result<(), StoreError> {
            self.inner.unqueue_task(t, i).await
        }
        async fn currently_queued_tasks_count(&self) -> Result<u64, StoreError> {
            self.inner.currently_queued_tasks_count().await
        }
        async fn executed_tasks_count(&self) -> Result<u64, StoreError> {
            self.inner.executed_tasks_count().await
        }
        async fn set_heartbeat(&self, p: &ProcessId, ttl: Duration) -> Result<bool, StoreError> {
            if self.beats.fetch_add(1, Ordering::SeqCst) >= self.ok_beats {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.set_heartbeat(p, ttl).await
        }
        async fn heartbeat_exists(&self, p: &ProcessId) -> Result<bool, StoreError> {
            self.inner.heartbeat_exists(p).await
        }
        fn is_shared(&self) -> bool {
            true
        }
    }

    fn flaky(ok_beats: u32) -> Arc<FlakyHeartbeatStore> {
        Arc::new(FlakyHeartbeatStore {
            inner: LocalStore::new(),
            beats: AtomicU32::new(0),
            ok_beats,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_is_stored_before_start_returns() {
        let store = flaky(u32::MAX);
        let me = ProcessId::generate(&SystemClock);
        let shutdown = Shutdown::new();
        let hb = Heartbeat::new(me, store.clone(), Duration::from_secs(5), Duration::from_secs(10));

        assert!(hb.start(shutdown.clone()).await);
        assert_eq!(store.beats.load(Ordering::SeqCst), 1);
        assert!(store.heartbeat_exists(&me).await.unwrap());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.beats.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        assert!(shutdown.take_fatal().is_none());
    }

    #[tokio::test]
    async fn failed_first_beat_is_fatal() {
        let shutdown = Shutdown::new();
        let hb = Heartbeat::new(
            ProcessId::generate(&SystemClock),
            flaky(0),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        assert!(!hb.start(shutdown.clone()).await);
        assert!(shutdown.is_cancelled());
        assert_eq!(shutdown.take_fatal().unwrap().kind(), ErrorKind::Liveness);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_cancels_and_records_the_error() {
        let store = flaky(2);
        let shutdown = Shutdown::new();
        let hb = Heartbeat::new(
            ProcessId::generate(&SystemClock),
            store,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        assert!(hb.start(shutdown.clone()).await);
        // beats at 0s and 5s succeed, the one at 10s fails
        shutdown.token().cancelled().await;

        let err = shutdown.take_fatal().unwrap();
        assert_eq!(err.kind(), ErrorKind::Liveness);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn only_the_first_fatal_error_is_kept() {
        let shutdown = Shutdown::new();
        shutdown.fail(TallyError::Liveness("first".into()));
        shutdown.fail(TallyError::Liveness("second".into()));
        assert!(shutdown.take_fatal().unwrap().to_string().contains("first"));
    }
}
