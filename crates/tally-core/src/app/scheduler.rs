//! TaskScheduler - turns ticks into claimed, submitted jobs.
//!
//! One attempt (`schedule_task`) is: check the backlog, claim the task
//! instance in the store, hand it to the engine. Every failure abandons the
//! attempt with a log line; the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::TaskEngine;
use super::heartbeat::{Heartbeat, Shutdown};
use super::status::SchedulingMonitor;
use crate::config::{HeartbeatConfig, TaskSchedule};
use crate::domain::{ProcessId, SINGLETON_INSTANCE, TaskEnvelope, TaskType};
use crate::error::TallyError;
use crate::ports::Store;

/// What a single scheduling attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Claimed and handed to the engine.
    Submitted,
    /// Backlog at its maximum, the store was not asked for a claim.
    Backpressure,
    /// Another live process (or this one) already holds the claim.
    AlreadyClaimed,
}

#[derive(Clone)]
pub struct TaskScheduler {
    process_id: ProcessId,
    store: Arc<dyn Store>,
    engine: Arc<TaskEngine>,
    monitor: Arc<SchedulingMonitor>,
    shutdown: Shutdown,
    maximum_queue_size: u64,
    heartbeat: HeartbeatConfig,
    /// Whether the first heartbeat was stored; set once per process.
    heartbeat_up: Arc<OnceCell<bool>>,
}

impl TaskScheduler {
    pub fn new(
        process_id: ProcessId,
        store: Arc<dyn Store>,
        engine: Arc<TaskEngine>,
        monitor: Arc<SchedulingMonitor>,
        shutdown: Shutdown,
        maximum_queue_size: u64,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            process_id,
            store,
            engine,
            monitor,
            shutdown,
            maximum_queue_size,
            heartbeat,
            heartbeat_up: Arc::new(OnceCell::new()),
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn monitor(&self) -> &Arc<SchedulingMonitor> {
        &self.monitor
    }

    /// Sets up `task_type` according to `schedule`: one attempt right away if
    /// `on_init`, a ticker if `scheduled`. Against a shared store the
    /// heartbeat is started and its first beat stored before anything is
    /// claimed; if that fails nothing is scheduled.
    pub async fn schedule(&self, task_type: TaskType, schedule: TaskSchedule) {
        info!(task_type = %task_type, schedule = %schedule.summary(), "scheduling task");
        if !self.ensure_heartbeat().await {
            warn!(task_type = %task_type, "heartbeat is not running, task not scheduled");
            return;
        }

        if schedule.on_init {
            // errors are logged by schedule_task
            let _ = self.schedule_task(&task_type, SINGLETON_INSTANCE, Vec::new()).await;
        }

        if schedule.scheduled {
            let scheduler = self.clone();
            let interval = schedule.interval();
            tokio::spawn(async move {
                scheduler.schedule_task_with_ticker(task_type, interval).await;
            });
        }
    }

    /// One scheduling attempt for `(task_type, instance_id)`.
    pub async fn schedule_task(
        &self,
        task_type: &TaskType,
        instance_id: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<ScheduleOutcome, TallyError> {
        let queued = self.store.currently_queued_tasks_count().await.map_err(|err| {
            warn!(task_type = %task_type, task_instance_id = instance_id, error = %err, "reading queue depth failed");
            err
        })?;
        if queued >= self.maximum_queue_size {
            warn!(
                task_type = %task_type,
                task_instance_id = instance_id,
                queued,
                maximum = self.maximum_queue_size,
                "queue is full, skipping"
            );
            return Ok(ScheduleOutcome::Backpressure);
        }

        let claimed = self
            .store
            .queue_task(task_type, instance_id, &self.process_id)
            .await
            .map_err(|err| {
                warn!(task_type = %task_type, task_instance_id = instance_id, error = %err, "claiming task failed");
                err
            })?;
        if !claimed {
            debug!(task_type = %task_type, task_instance_id = instance_id, "task already claimed");
            return Ok(ScheduleOutcome::AlreadyClaimed);
        }

        // The claim stays if this fails; only the owner's unqueue clears it.
        self.engine
            .submit(TaskEnvelope::new(task_type.clone(), instance_id, args))
            .map_err(|err| {
                warn!(task_type = %task_type, task_instance_id = instance_id, error = %err, "submitting task failed");
                err
            })?;
        debug!(task_type = %task_type, task_instance_id = instance_id, "task submitted");
        Ok(ScheduleOutcome::Submitted)
    }

    /// Attempts `task_type` every `interval` until shutdown. A zero interval
    /// disables the loop.
    pub async fn schedule_task_with_ticker(&self, task_type: TaskType, interval: Duration) {
        if interval.is_zero() {
            info!(task_type = %task_type, "interval is not positive, periodic scheduling disabled");
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.monitor.mark_next(&task_type, interval);

        loop {
            tokio::select! {
                _ = self.shutdown.token().cancelled() => break,
                _ = ticker.tick() => {}
            }
            let _ = self.schedule_task(&task_type, SINGLETON_INSTANCE, Vec::new()).await;
            self.monitor.mark_next(&task_type, interval);
        }
        debug!(task_type = %task_type, "ticker stopped");
    }

    async fn ensure_heartbeat(&self) -> bool {
        if !self.store.is_shared() {
            return true;
        }
        *self
            .heartbeat_up
            .get_or_init(|| {
                let heartbeat = Heartbeat::new(
                    self.process_id,
                    Arc::clone(&self.store),
                    self.heartbeat.interval(),
                    self.heartbeat.ttl(),
                );
                heartbeat.start(self.shutdown.clone())
            })
            .await
    }
}
