//! TaskEngine - bounded job queue plus a fixed worker pool.
//!
//! `submit` never waits: a full queue is reported to the caller, who drops the
//! attempt. Each worker runs one job at a time. The handler runs in its own
//! tokio task so a panic only fails that job; the claim is released and the
//! last-run time recorded afterwards, whatever the outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::status::SchedulingMonitor;
use crate::domain::TaskEnvelope;
use crate::error::TallyError;
use crate::ports::Store;
use crate::runtime::{HandlerRegistry, TaskContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub capacity: usize,
    pub workers: usize,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<TaskEnvelope>>>;

/// Everything a worker needs, shared by all of them.
struct WorkerShared {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn Store>,
    monitor: Arc<SchedulingMonitor>,
    failed: AtomicU64,
    cancel: CancellationToken,
}

pub struct TaskEngine {
    tx: mpsc::Sender<TaskEnvelope>,
    shared: Arc<WorkerShared>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl TaskEngine {
    /// Starts `config.workers` workers. They stop when `cancel` fires.
    pub fn start(
        config: EngineConfig,
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn Store>,
        monitor: Arc<SchedulingMonitor>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.clamp(1, tokio::sync::Semaphore::MAX_PERMITS));
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(WorkerShared {
            registry,
            store,
            monitor,
            failed: AtomicU64::new(0),
            cancel,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..config.workers.max(1) {
            workers.spawn(worker_loop(worker_id, Arc::clone(&rx), Arc::clone(&shared)));
        }
        info!(workers = config.workers, capacity = config.capacity, "task engine started");

        Self {
            tx,
            shared,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// Queues a job without waiting.
    pub fn submit(&self, envelope: TaskEnvelope) -> Result<(), TallyError> {
        let task_type = envelope.task_type().clone();
        self.tx.try_send(envelope).map_err(|err| {
            let message = match err {
                mpsc::error::TrySendError::Full(_) => "job queue is full",
                mpsc::error::TrySendError::Closed(_) => "task engine is stopped",
            };
            TallyError::Submit {
                task_type,
                message: message.to_string(),
            }
        })
    }

    /// Jobs waiting for a worker.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handler runs that returned an error or panicked.
    pub fn failed_tasks(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Stops the workers and waits for them. A job already picked up runs to
    /// completion; queued jobs are dropped.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut workers) = workers {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "engine worker ended abnormally");
                }
            }
        }
        info!("task engine stopped");
    }
}

async fn worker_loop(worker_id: usize, rx: SharedReceiver, shared: Arc<WorkerShared>) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shared.cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(envelope) = job else {
            debug!(worker_id, "engine worker exiting");
            return;
        };
        run_job(worker_id, envelope, &shared).await;
    }
}

async fn run_job(worker_id: usize, envelope: TaskEnvelope, shared: &WorkerShared) {
    let task_type = envelope.task_type().clone();
    let instance_id = envelope.instance_id().to_string();
    let ctx = TaskContext::new(envelope, shared.cancel.child_token(), Arc::clone(&shared.store));

    let registry = Arc::clone(&shared.registry);
    let outcome = tokio::spawn(async move { registry.execute(ctx).await }).await;

    match outcome {
        Ok(Ok(())) => {
            debug!(worker_id, task_type = %task_type, task_instance_id = %instance_id, "task done");
        }
        Ok(Err(err)) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker_id,
                task_type = %task_type,
                task_instance_id = %instance_id,
                error = %err,
                "task failed"
            );
        }
        Err(join_err) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id,
                task_type = %task_type,
                task_instance_id = %instance_id,
                error = %join_err,
                "task handler panicked"
            );
        }
    }

    if let Err(err) = shared.store.unqueue_task(&task_type, &instance_id).await {
        warn!(
            task_type = %task_type,
            task_instance_id = %instance_id,
            error = %err,
            "releasing task claim failed"
        );
    }
    shared.monitor.mark_last(&task_type);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessId, TaskType};
    use crate::ports::SystemClock;
    use crate::runtime::TaskHandler;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        /// Signals `started`, then waits for `gate`.
        Block { started: Arc<Notify>, gate: Arc<Notify> },
    }

    struct TestHandler(Behaviour);

    #[async_trait]
    impl TaskHandler for TestHandler {
        async fn handle(&self, _ctx: TaskContext) -> Result<(), TallyError> {
            match &self.0 {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(TallyError::handler(TaskType::new("pull"), "upstream down")),
                Behaviour::Panic => panic!("handler bug"),
                Behaviour::Block { started, gate } => {
                    started.notify_one();
                    gate.notified().await;
                    Ok(())
                }
            }
        }
    }

    struct Harness {
        engine: TaskEngine,
        store: Arc<LocalStore>,
        monitor: Arc<SchedulingMonitor>,
    }

    fn harness(behaviour: Behaviour, capacity: usize) -> Harness {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskType::new("pull"), Arc::new(TestHandler(behaviour)))
            .unwrap();
        let store = Arc::new(LocalStore::new());
        let monitor = Arc::new(SchedulingMonitor::new(Arc::new(SystemClock)));
        let engine = TaskEngine::start(
            EngineConfig { capacity, workers: 1 },
            Arc::new(registry),
            store.clone(),
            monitor.clone(),
            CancellationToken::new(),
        );
        Harness {
            engine,
            store,
            monitor,
        }
    }

    async fn wait_for_executed(store: &LocalStore, count: u64) {
        for _ in 0..400 {
            if store.executed_tasks_count().await.unwrap() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("claims were never released");
    }

    async fn claim_and_submit(h: &Harness, instance_id: &str) {
        let pull = TaskType::new("pull");
        let me = ProcessId::generate(&SystemClock);
        assert!(h.store.queue_task(&pull, instance_id, &me).await.unwrap());
        h.engine.submit(TaskEnvelope::new(pull, instance_id, vec![])).unwrap();
    }

    #[tokio::test]
    async fn successful_run_releases_the_claim() {
        let h = harness(Behaviour::Succeed, 4);
        claim_and_submit(&h, "_").await;
        wait_for_executed(&h.store, 1).await;

        assert_eq!(h.store.currently_queued_tasks_count().await.unwrap(), 0);
        assert_eq!(h.engine.failed_tasks(), 0);
        assert!(h.monitor.get(&TaskType::new("pull")).unwrap().last.is_some());
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn failed_run_is_counted_and_still_released() {
        let h = harness(Behaviour::Fail, 4);
        claim_and_submit(&h, "_").await;
        wait_for_executed(&h.store, 1).await;

        assert_eq!(h.store.currently_queued_tasks_count().await.unwrap(), 0);
        assert_eq!(h.engine.failed_tasks(), 1);
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_worker() {
        let h = harness(Behaviour::Panic, 4);
        claim_and_submit(&h, "_").await;
        wait_for_executed(&h.store, 1).await;
        assert_eq!(h.engine.failed_tasks(), 1);

        // the only worker is still there for the next job
        claim_and_submit(&h, "again").await;
        wait_for_executed(&h.store, 2).await;
        assert_eq!(h.engine.failed_tasks(), 2);
        assert_eq!(h.store.currently_queued_tasks_count().await.unwrap(), 0);
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let h = harness(
            Behaviour::Block {
                started: started.clone(),
                gate: gate.clone(),
            },
            1,
        );
        let pull = TaskType::new("pull");

        // one job running, one waiting, the third does not fit
        h.engine.submit(TaskEnvelope::new(pull.clone(), "a", vec![])).unwrap();
        started.notified().await;
        h.engine.submit(TaskEnvelope::new(pull.clone(), "b", vec![])).unwrap();
        assert_eq!(h.engine.len(), 1);

        let err = h.engine.submit(TaskEnvelope::new(pull, "c", vec![])).unwrap_err();
        assert!(matches!(err, TallyError::Submit { .. }));
        assert!(err.to_string().contains("full"));

        gate.notify_one();
        started.notified().await;
        gate.notify_one();
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let h = harness(Behaviour::Succeed, 4);
        h.engine.shutdown().await;

        let err = h
            .engine
            .submit(TaskEnvelope::new(TaskType::new("pull"), "_", vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("stopped"));
    }
}
