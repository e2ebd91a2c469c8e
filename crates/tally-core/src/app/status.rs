//! SchedulingMonitor - last/next run per task type.
//!
//! The scheduler and the engine write, the introspection endpoint reads a
//! snapshot. The table never leaves the mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{TaskSchedulingStatus, TaskType};
use crate::ports::Clock;

pub struct SchedulingMonitor {
    statuses: Mutex<HashMap<TaskType, TaskSchedulingStatus>>,
    clock: Arc<dyn Clock>,
}

impl SchedulingMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn update(&self, task_type: &TaskType, f: impl FnOnce(&mut TaskSchedulingStatus)) {
        let mut statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        f(statuses.entry(task_type.clone()).or_default());
    }

    /// Records that a run of `task_type` just finished.
    pub fn mark_last(&self, task_type: &TaskType) {
        let now = self.clock.now();
        self.update(task_type, |status| status.last = Some(now));
    }

    /// Records that the next tick of `task_type` is `after` from now.
    pub fn mark_next(&self, task_type: &TaskType, after: Duration) {
        let next = self.clock.now() + chrono::Duration::from_std(after).unwrap_or(chrono::Duration::zero());
        self.update(task_type, |status| status.next = Some(next));
    }

    pub fn get(&self, task_type: &TaskType) -> Option<TaskSchedulingStatus> {
        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        statuses.get(task_type).copied()
    }

    /// Copy of the table, ordered by task type.
    pub fn snapshot(&self) -> BTreeMap<TaskType, TaskSchedulingStatus> {
        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        statuses.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
