//! Status-set metrics.
//!
//! An enumerated state is exported as one metric per possible value, all
//! sharing the same labels plus `status`. The observed value is 1, the others
//! 0. In sparse mode the others are deleted from the store instead.

use tracing::error;

use crate::domain::{Labels, Metric, MetricKind};
use crate::ports::Store;

pub const STATUS_LABEL: &str = "status";

/// Writes the status set of `kind` for `current`. `statuses` is the full,
/// fixed set of values the state can take. Store failures are logged and the
/// remaining statuses are still written.
pub async fn emit_status_metric(
    store: &dyn Store,
    kind: MetricKind,
    labels: &Labels,
    statuses: &[&str],
    current: &str,
    sparse: bool,
) {
    for status in statuses {
        let mut status_labels = labels.clone();
        status_labels.insert(STATUS_LABEL.to_string(), status.to_string());

        let key = Metric::key_for(kind, &status_labels);
        let written = if *status == current {
            store.set_metric(Metric::new(kind, status_labels, 1.0)).await
        } else if sparse {
            store.del_metric(&key).await
        } else {
            store.set_metric(Metric::new(kind, status_labels, 0.0)).await
        };
        if let Err(err) = written {
            error!(metric_key = %key, error = %err, "writing status metric to the store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MetricKey, Metrics, ProcessId, TaskType, labels};
    use crate::error::StoreError;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::time::Duration;

    const JOB_STATUS: MetricKind = MetricKind::new(5);
    const STATUSES: [&str; 3] = ["queued", "running", "failed"];

    fn with_status(status: &str) -> Labels {
        labels([("repo", "a"), (STATUS_LABEL, status)])
    }

    async fn value_of(store: &LocalStore, status: &str) -> Option<f64> {
        store
            .get_metric(&Metric::key_for(JOB_STATUS, &with_status(status)))
            .await
            .unwrap()
            .map(|m| m.value)
    }

    #[tokio::test]
    async fn dense_mode_writes_every_status() {
        let store = LocalStore::new();
        emit_status_metric(&store, JOB_STATUS, &labels([("repo", "a")]), &STATUSES, "running", false).await;

        assert_eq!(store.metrics_count().await.unwrap(), 3);
        assert_eq!(value_of(&store, "queued").await, Some(0.0));
        assert_eq!(value_of(&store, "running").await, Some(1.0));
        assert_eq!(value_of(&store, "failed").await, Some(0.0));
    }

    #[tokio::test]
    async fn sparse_mode_keeps_only_the_current_status() {
        let store = LocalStore::new();
        let base = labels([("repo", "a")]);
        // left over from a dense run
        emit_status_metric(&store, JOB_STATUS, &base, &STATUSES, "queued", false).await;

        emit_status_metric(&store, JOB_STATUS, &base, &STATUSES, "running", true).await;

        assert_eq!(store.metrics_count().await.unwrap(), 1);
        assert_eq!(value_of(&store, "running").await, Some(1.0));
        assert_eq!(value_of(&store, "queued").await, None);
        assert_eq!(value_of(&store, "failed").await, None);
    }

    #[tokio::test]
    async fn other_label_sets_are_untouched() {
        let store = LocalStore::new();
        emit_status_metric(&store, JOB_STATUS, &labels([("repo", "b")]), &STATUSES, "failed", false).await;
        emit_status_metric(&store, JOB_STATUS, &labels([("repo", "a")]), &STATUSES, "running", true).await;

        assert_eq!(store.metrics_count().await.unwrap(), 4);
    }

    /// Refuses writes of the `queued` status.
    struct PartlyDown(LocalStore);

    #[async_trait]
    impl Store for PartlyDown {
        async fn metrics(&self) -> Result<Metrics, StoreError> {
            self.0.metrics().await
        }
        async fn set_metric(&self, metric: Metric) -> Result<(), StoreError> {
            if metric.labels.get(STATUS_LABEL).map(String::as_str) == Some("queued") {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.0.set_metric(metric).await
        }
        async fn get_metric(&self, key: &MetricKey) -> Result<Option<Metric>, StoreError> {
            self.0.get_metric(key).await
        }
        async fn del_metric(&self, key: &MetricKey) -> Result<(), StoreError> {
            self.0.del_metric(key).await
        }
        async fn metric_exists(&self, key: &MetricKey) -> Result<bool, StoreError> {
            self.0.metric_exists(key).await
        }
        async fn metrics_count(&self) -> Result<u64, StoreError> {
            self.0.metrics_count().await
        }
        async fn queue_task(&self, t: &TaskType, i: &str, p: &ProcessId) -> Result<bool, StoreError> {
            self.0.queue_task(t, i, p).await
        }
        async fn unqueue_task(&self, t: &TaskType, i: &str) -> Result<(), StoreError> {
            self.0.unqueue_task(t, i).await
        }
        async fn currently_queued_tasks_count(&self) -> Result<u64, StoreError> {
            self.0.currently_queued_tasks_count().await
        }
        async fn executed_tasks_count(&self) -> Result<u64, StoreError> {
            self.0.executed_tasks_count().await
        }
        async fn set_heartbeat(&self, p: &ProcessId, ttl: Duration) -> Result<bool, StoreError> {
            self.0.set_heartbeat(p, ttl).await
        }
        async fn heartbeat_exists(&self, p: &ProcessId) -> Result<bool, StoreError> {
            self.0.heartbeat_exists(p).await
        }
        fn is_shared(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_the_rest() {
        let store = PartlyDown(LocalStore::new());
        emit_status_metric(&store, JOB_STATUS, &labels([("repo", "a")]), &STATUSES, "running", false).await;

        assert_eq!(value_of(&store.0, "queued").await, None);
        assert_eq!(value_of(&store.0, "running").await, Some(1.0));
        assert_eq!(value_of(&store.0, "failed").await, Some(0.0));
    }
}
