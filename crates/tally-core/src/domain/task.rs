use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instance id used by periodic singleton tasks.
pub const SINGLETON_INSTANCE: &str = "_";

/// Kind of periodic work (e.g. "TaskTypePullMendRenovateStatus").
/// Registered exactly once per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Last completed run and next scheduled tick of a task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedulingStatus {
    pub last: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

/// A job handed to the execution engine once its claim is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_type: TaskType,
    instance_id: String,
    args: Vec<serde_json::Value>,
}

impl TaskEnvelope {
    pub fn new(task_type: TaskType, instance_id: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            task_type,
            instance_id: instance_id.into(),
            args,
        }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.args
    }
}
