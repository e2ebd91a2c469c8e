//! Domain model: task types, process ids, metrics, scheduling status.

pub mod ids;
pub mod metric;
pub mod task;

pub use ids::{ParseProcessIdError, ProcessId};
pub use metric::{Labels, Metric, MetricKey, MetricKind, Metrics, labels};
pub use task::{SINGLETON_INSTANCE, TaskEnvelope, TaskSchedulingStatus, TaskType};
