//! Mend Renovate exporter: pulls `/api/status` and stores it as metrics.

mod client;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub use self::client::{RenovateClient, RenovateError, Status};

use crate::app::store_set_metric;
use crate::domain::{Labels, Metric, MetricKind, SINGLETON_INSTANCE, TaskType};
use crate::error::TallyError;
use crate::ports::Store;
use crate::registry::{CollectorSpec, emit_status_metric};
use crate::runtime::{TaskContext, TaskHandler};

pub const TASK_TYPE_PULL_STATUS: &str = "TaskTypePullMendRenovateStatus";
/// The pull task is a periodic singleton.
pub const PULL_STATUS_INSTANCE: &str = SINGLETON_INSTANCE;

pub const JOBS_QUEUE_LENGTH: MetricKind = MetricKind::new(1);
pub const JOBS_PROCESSED_TOTAL: MetricKind = MetricKind::new(2);
pub const JOBS_IN_PROGRESS: MetricKind = MetricKind::new(3);
pub const WORKER_STATUS: MetricKind = MetricKind::new(4);

pub const WORKER_STATUSES: [&str; 2] = ["idle", "busy"];

pub fn task_type() -> TaskType {
    TaskType::new(TASK_TYPE_PULL_STATUS)
}

pub fn collectors() -> Vec<CollectorSpec> {
    vec![
        CollectorSpec::gauge(
            JOBS_QUEUE_LENGTH,
            "mre_renovate_jobs_queue_length",
            "Number of jobs in the Renovate queue",
            &[],
        ),
        CollectorSpec::counter(
            JOBS_PROCESSED_TOTAL,
            "mre_renovate_jobs_processed_total",
            "Number of jobs processed since the Renovate server started",
            &[],
        ),
        CollectorSpec::gauge(
            JOBS_IN_PROGRESS,
            "mre_renovate_jobs_in_progress",
            "Number of jobs currently running",
            &[],
        ),
        CollectorSpec::gauge(
            WORKER_STATUS,
            "mre_renovate_worker_status",
            "Status of the Renovate worker",
            &["status"],
        ),
    ]
}

/// Handler of `TaskTypePullMendRenovateStatus`.
pub struct PullStatusHandler {
    client: RenovateClient,
    sparse_metrics: bool,
}

impl PullStatusHandler {
    pub fn new(client: RenovateClient, sparse_metrics: bool) -> Self {
        Self {
            client,
            sparse_metrics,
        }
    }

    pub fn into_handler(self) -> Arc<dyn TaskHandler> {
        Arc::new(self)
    }
}

#[async_trait]
impl TaskHandler for PullStatusHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<(), TallyError> {
        let fetched = tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                return Err(TallyError::handler(ctx.task_type().clone(), "cancelled"));
            }
            fetched = self.client.get_status() => fetched,
        };
        let status = fetched.map_err(|err| TallyError::handler(ctx.task_type().clone(), err.to_string()))?;

        store_status(ctx.store().as_ref(), &status, self.sparse_metrics).await;
        debug!(
            task_type = %ctx.task_type(),
            task_instance_id = ctx.instance_id(),
            queue_length = status.jobs.queue_length,
            "renovate status pulled"
        );
        Ok(())
    }
}

async fn store_status(store: &dyn Store, status: &Status, sparse: bool) {
    store_set_metric(store, Metric::unlabeled(JOBS_QUEUE_LENGTH, status.jobs.queue_length as f64)).await;
    store_set_metric(
        store,
        Metric::unlabeled(JOBS_PROCESSED_TOTAL, status.jobs.total_jobs_processed as f64),
    )
    .await;
    store_set_metric(
        store,
        Metric::unlabeled(JOBS_IN_PROGRESS, status.jobs_in_progress.len() as f64),
    )
    .await;

    let current = if status.worker.is_busy() { "busy" } else { "idle" };
    emit_status_metric(store, WORKER_STATUS, &Labels::new(), &WORKER_STATUSES, current, sparse).await;
}
