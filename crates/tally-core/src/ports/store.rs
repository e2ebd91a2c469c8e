//! Store port.
//!
//! The store owns everything that is shared between exporter instances:
//! metrics, task claims, the executed-task counter and heartbeats. The
//! scheduler, the export registry and the task handlers reach that state only
//! through this trait.
//!
//! Implementations:
//! - `LocalStore`: in-process, single instance only.
//! - `SharedStore<B>`: over a `KeyValueBackend` (Redis in production,
//!   `MemoryBackend` in tests), safe for several instances.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Metric, MetricKey, Metrics, ProcessId, TaskType};
use crate::error::StoreError;

#[async_trait]
pub trait Store: Send + Sync {
    // Metrics
    async fn metrics(&self) -> Result<Metrics, StoreError>;
    async fn set_metric(&self, metric: Metric) -> Result<(), StoreError>;
    async fn get_metric(&self, key: &MetricKey) -> Result<Option<Metric>, StoreError>;
    async fn del_metric(&self, key: &MetricKey) -> Result<(), StoreError>;
    async fn metric_exists(&self, key: &MetricKey) -> Result<bool, StoreError>;
    async fn metrics_count(&self) -> Result<u64, StoreError>;

    /// Claims `(task_type, instance_id)` for `process_id`.
    ///
    /// Returns `true` when the claim was created, or transferred from an owner
    /// whose heartbeat has expired. Returns `false` when the current owner is
    /// alive or is the caller itself.
    async fn queue_task(
        &self,
        task_type: &TaskType,
        instance_id: &str,
        process_id: &ProcessId,
    ) -> Result<bool, StoreError>;

    /// Drops the claim. The executed counter only moves when a claim existed,
    /// so calling this twice counts once.
    async fn unqueue_task(&self, task_type: &TaskType, instance_id: &str) -> Result<(), StoreError>;

    async fn currently_queued_tasks_count(&self) -> Result<u64, StoreError>;
    async fn executed_tasks_count(&self) -> Result<u64, StoreError>;

    /// Creates the heartbeat record of `process_id` with the given TTL.
    /// Returns whether the record was created (as opposed to refreshed).
    async fn set_heartbeat(&self, process_id: &ProcessId, ttl: Duration) -> Result<bool, StoreError>;
    async fn heartbeat_exists(&self, process_id: &ProcessId) -> Result<bool, StoreError>;

    /// Whether several processes may share this store. The heartbeat loop only
    /// runs against shared stores.
    fn is_shared(&self) -> bool;
}
