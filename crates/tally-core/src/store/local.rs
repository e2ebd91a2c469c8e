//! In-process store, for single-instance deployments.
//!
//! One read/write lock per logical table: readers of a table run concurrently,
//! writers are exclusive. Every mutation happens inside one write-lock
//! critical section, so there is no check-then-act window on the claim path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{Metric, MetricKey, Metrics, ProcessId, TaskType};
use crate::error::StoreError;
use crate::ports::{Clock, Store, SystemClock};

#[derive(Default)]
struct TaskTable {
    claims: HashMap<TaskType, HashMap<String, ProcessId>>,
    executed: u64,
}

pub struct LocalStore {
    metrics: RwLock<Metrics>,
    tasks: RwLock<TaskTable>,
    heartbeats: RwLock<HashMap<ProcessId, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            metrics: RwLock::new(Metrics::new()),
            tasks: RwLock::new(TaskTable::default()),
            heartbeats: RwLock::new(HashMap::new()),
            clock,
        }
    }

    async fn owner_alive(&self, owner: &ProcessId) -> bool {
        let heartbeats = self.heartbeats.read().await;
        heartbeats
            .get(owner)
            .is_some_and(|expires_at| *expires_at > self.clock.now())
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn metrics(&self) -> Result<Metrics, StoreError> {
        Ok(self.metrics.read().await.clone())
    }

    async fn set_metric(&self, metric: Metric) -> Result<(), StoreError> {
        self.metrics.write().await.insert(metric.key(), metric);
        Ok(())
    }

    async fn get_metric(&self, key: &MetricKey) -> Result<Option<Metric>, StoreError> {
        Ok(self.metrics.read().await.get(key).cloned())
    }

    async fn del_metric(&self, key: &MetricKey) -> Result<(), StoreError> {
        self.metrics.write().await.remove(key);
        Ok(())
    }

    async fn metric_exists(&self, key: &MetricKey) -> Result<bool, StoreError> {
        Ok(self.metrics.read().await.contains_key(key))
    }

    async fn metrics_count(&self) -> Result<u64, StoreError> {
        Ok(self.metrics.read().await.len() as u64)
    }

    async fn queue_task(
        &self,
        task_type: &TaskType,
        instance_id: &str,
        process_id: &ProcessId,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let claims = tasks.claims.entry(task_type.clone()).or_default();

        if let Some(owner) = claims.get(instance_id).copied() {
            if owner == *process_id || self.owner_alive(&owner).await {
                return Ok(false);
            }
            tracing::warn!(
                task_type = %task_type,
                task_instance_id = instance_id,
                previous_owner = %owner,
                process_id = %process_id,
                "claim owner has no heartbeat, taking the claim over"
            );
        }

        claims.insert(instance_id.to_string(), *process_id);
        Ok(true)
    }

    async fn unqueue_task(&self, task_type: &TaskType, instance_id: &str) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let removed = tasks
            .claims
            .get_mut(task_type)
            .and_then(|claims| claims.remove(instance_id))
            .is_some();
        if removed {
            tasks.executed += 1;
        }
        Ok(())
    }

    async fn currently_queued_tasks_count(&self) -> Result<u64, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.claims.values().map(|c| c.len() as u64).sum())
    }

    async fn executed_tasks_count(&self) -> Result<u64, StoreError> {
        Ok(self.tasks.read().await.executed)
    }

    async fn set_heartbeat(&self, process_id: &ProcessId, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut heartbeats = self.heartbeats.write().await;
        let created = heartbeats
            .get(process_id)
            .is_none_or(|current| *current <= now);
        heartbeats.insert(*process_id, expires_at);
        Ok(created)
    }

    async fn heartbeat_exists(&self, process_id: &ProcessId) -> Result<bool, StoreError> {
        Ok(self.owner_alive(process_id).await)
    }

    fn is_shared(&self) -> bool {
        false
    }
}
