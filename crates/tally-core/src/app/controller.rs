//! Controller - the running exporter.
//!
//! Ties the store, the scheduler, the engine and the declared collectors
//! together. Built by `ControllerBuilder`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::engine::TaskEngine;
use super::heartbeat::Shutdown;
use super::scheduler::{ScheduleOutcome, TaskScheduler};
use super::status::SchedulingMonitor;
use crate::config::{Config, TaskSchedule};
use crate::domain::{Metric, MetricKey, ProcessId, TaskSchedulingStatus, TaskType};
use crate::error::TallyError;
use crate::ports::Store;
use crate::registry::{CollectorSet, Format, Registry, RegistryError, Rendered};

pub struct Controller {
    pub(super) config: Arc<Config>,
    pub(super) process_id: ProcessId,
    pub(super) store: Arc<dyn Store>,
    pub(super) scheduler: TaskScheduler,
    pub(super) engine: Arc<TaskEngine>,
    pub(super) collectors: Arc<CollectorSet>,
    pub(super) shutdown: Shutdown,
}

/// Read-only view served by the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub process_id: String,
    pub listener_address: String,
    pub tasks: BTreeMap<TaskType, TaskSchedulingStatus>,
    /// Handler runs in this process that returned an error or panicked.
    pub failed_tasks: u64,
}

impl Controller {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<SchedulingMonitor> {
        self.scheduler.monitor()
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub async fn schedule(&self, task_type: TaskType, schedule: TaskSchedule) {
        self.scheduler.schedule(task_type, schedule).await;
    }

    pub async fn schedule_task(
        &self,
        task_type: &TaskType,
        instance_id: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<ScheduleOutcome, TallyError> {
        self.scheduler.schedule_task(task_type, instance_id, args).await
    }

    /// Releases a claim. Failures are logged, not returned.
    pub async fn unqueue_task(&self, task_type: &TaskType, instance_id: &str) {
        if let Err(err) = self.store.unqueue_task(task_type, instance_id).await {
            warn!(task_type = %task_type, task_instance_id = instance_id, error = %err, "unqueuing task");
        }
    }

    /// Builds a registry, fills it from the store and renders it in the
    /// format negotiated from `accept`.
    pub async fn scrape(&self, accept: Option<&str>) -> Result<Rendered, RegistryError> {
        let registry = Registry::new(&self.collectors)?;

        match self.store.metrics().await {
            Ok(metrics) => registry.export_metrics(&metrics),
            Err(err) => error!(error = %err, "reading metrics from the store"),
        }
        if let Err(err) = registry
            .export_internal_metrics(self.store.as_ref(), self.engine.failed_tasks())
            .await {
            warn!(error = %err, "exporting internal metrics");
        }
        debug!(samples = registry.sample_count(), "scrape exported");

        let format = Format::negotiate(accept, self.config.server.metrics.enable_openmetrics_encoding);
        registry.render(format)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            process_id: self.process_id.to_string(),
            listener_address: self.config.server.listen_address.clone(),
            tasks: self.monitor().snapshot(),
            failed_tasks: self.engine.failed_tasks(),
        }
    }

    /// Cancels the root token and waits for the engine workers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.engine.shutdown().await;
    }
}

pub async fn store_get_metric(store: &dyn Store, key: &MetricKey) -> Option<Metric> {
    match store.get_metric(key).await {
        Ok(metric) => metric,
        Err(err) => {
            error!(metric_key = %key, error = %err, "reading metric from the store");
            None
        }
    }
}

pub async fn store_set_metric(store: &dyn Store, metric: Metric) {
    let key = metric.key();
    if let Err(err) = store.set_metric(metric).await {
        error!(metric_key = %key, error = %err, "writing metric to the store");
    }
}

pub async fn store_del_metric(store: &dyn Store, key: &MetricKey) {
    if let Err(err) = store.del_metric(key).await {
        error!(metric_key = %key, error = %err, "deleting metric from the store");
    }
}
