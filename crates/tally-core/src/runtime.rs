use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{TaskEnvelope, TaskType};
use crate::error::TallyError;
use crate::ports::Store;

/// Everything a handler gets for one run of a claimed task.
#[derive(Clone)]
pub struct TaskContext {
    envelope: TaskEnvelope,
    cancel: CancellationToken,
    store: Arc<dyn Store>,
}

impl TaskContext {
    pub fn new(envelope: TaskEnvelope, cancel: CancellationToken, store: Arc<dyn Store>) -> Self {
        Self {
            envelope,
            cancel,
            store,
        }
    }

    pub fn task_type(&self) -> &TaskType {
        self.envelope.task_type()
    }

    pub fn instance_id(&self) -> &str {
        self.envelope.instance_id()
    }

    pub fn args(&self) -> &[serde_json::Value] {
        self.envelope.args()
    }

    /// Cancelled when the process shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

/// A handler for a specific task type.
///
/// Handlers do not need to release their claim: the engine does it once the
/// handler returns, whatever the outcome.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<(), TallyError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Built during initialization, read-only once the engine runs.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Result<(), TallyError> {
        if self.handlers.contains_key(&task_type) {
            return Err(TallyError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &TaskType> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler registered for the context's task type.
    pub async fn execute(&self, ctx: TaskContext) -> Result<(), TallyError> {
        let handler = self
            .get(ctx.task_type())
            .ok_or_else(|| TallyError::HandlerNotFound(ctx.task_type().clone()))?;
        handler.handle(ctx).await
    }
}
