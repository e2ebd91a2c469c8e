//! ControllerBuilder - wiring and startup validation.
//!
//! Handlers and collectors are declared on the builder; `build()` checks that
//! every expected task type has a handler, then starts the engine.

use std::sync::Arc;

use super::controller::Controller;
use super::engine::{EngineConfig, TaskEngine};
use super::heartbeat::Shutdown;
use super::scheduler::TaskScheduler;
use super::status::SchedulingMonitor;
use crate::config::Config;
use crate::domain::{ProcessId, TaskType};
use crate::error::TallyError;
use crate::ports::{Clock, Store, SystemClock};
use crate::registry::{CollectorSet, CollectorSpec, RegistryError};
use crate::runtime::{HandlerRegistry, TaskHandler};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

pub struct ControllerBuilder {
    config: Config,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    process_id: Option<ProcessId>,
    shutdown: Shutdown,
    handlers: HandlerRegistry,
    collectors: CollectorSet,
    expected_tasks: Option<Vec<TaskType>>,
}

impl ControllerBuilder {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            process_id: None,
            shutdown: Shutdown::new(),
            handlers: HandlerRegistry::new(),
            collectors: CollectorSet::new(),
            expected_tasks: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fixes the process id instead of generating one.
    pub fn process_id(mut self, process_id: ProcessId) -> Self {
        self.process_id = Some(process_id);
        self
    }

    /// Shares an existing root shutdown handle, e.g. one the binary also
    /// cancels on signals.
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn register(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Result<Self, TallyError> {
        self.handlers.register(task_type, handler)?;
        Ok(self)
    }

    pub fn collectors(mut self, specs: impl IntoIterator<Item = CollectorSpec>) -> Result<Self, RegistryError> {
        for spec in specs {
            self.collectors.register(spec)?;
        }
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| TaskType::new(*t)).collect());
        self
    }

    /// Validates and starts the engine. Must run inside a tokio runtime.
    pub fn build(self) -> Result<Controller, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.handlers.contains(t))
                .map(|t| t.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let process_id = self
            .process_id
            .unwrap_or_else(|| ProcessId::generate(self.clock.as_ref()));
        let monitor = Arc::new(SchedulingMonitor::new(Arc::clone(&self.clock)));
        let scheduler_config = self.config.scheduler;

        let engine = Arc::new(TaskEngine::start(
            EngineConfig {
                capacity: usize::try_from(scheduler_config.maximum_jobs_queue_size).unwrap_or(usize::MAX),
                workers: scheduler_config.workers,
            },
            Arc::new(self.handlers),
            Arc::clone(&self.store),
            Arc::clone(&monitor),
            self.shutdown.token().child_token(),
        ));
        let scheduler = TaskScheduler::new(
            process_id,
            Arc::clone(&self.store),
            Arc::clone(&engine),
            monitor,
            self.shutdown.clone(),
            scheduler_config.maximum_jobs_queue_size,
            scheduler_config.heartbeat,
        );

        tracing::info!(process_id = %process_id, shared = self.store.is_shared(), "controller ready");
        Ok(Controller {
            config: Arc::new(self.config),
            process_id,
            store: self.store,
            scheduler,
            engine,
            collectors: Arc::new(self.collectors),
            shutdown: self.shutdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TaskContext;
    use crate::store::LocalStore;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _ctx: TaskContext) -> Result<(), TallyError> {
            Ok(())
        }
    }

    fn builder() -> ControllerBuilder {
        ControllerBuilder::new(Config::default(), Arc::new(LocalStore::new()))
    }

    #[tokio::test]
    async fn build_succeeds_when_expected_tasks_are_registered() {
        let controller = builder()
            .register(TaskType::new("pull"), Arc::new(NoopHandler))
            .unwrap()
            .expect_tasks(&["pull"])
            .build()
            .unwrap();
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn build_reports_missing_task_types() {
        let result = builder()
            .register(TaskType::new("pull"), Arc::new(NoopHandler))
            .unwrap()
            .expect_tasks(&["pull", "push"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["push".to_string()]
        ));
    }

    #[test]
    fn duplicate_handler_is_rejected() {
        let result = builder()
            .register(TaskType::new("pull"), Arc::new(NoopHandler))
            .unwrap()
            .register(TaskType::new("pull"), Arc::new(NoopHandler));
        assert!(matches!(result, Err(TallyError::DuplicateHandler(_))));
    }

    #[tokio::test]
    async fn fixed_process_id_is_kept() {
        let id = ProcessId::generate(&SystemClock);
        let controller = builder().process_id(id).build().unwrap();
        assert_eq!(controller.process_id(), &id);
        controller.shutdown().await;
    }
}
