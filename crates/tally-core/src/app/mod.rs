//! App layer: engine, scheduler, heartbeat, controller and HTTP surfaces,
//! built on the ports.

pub mod builder;
pub mod controller;
pub mod engine;
pub mod heartbeat;
pub mod scheduler;
pub mod server;
pub mod status;

pub use self::builder::{BuildError, ControllerBuilder};
pub use self::controller::{Controller, StatusReport, store_del_metric, store_get_metric, store_set_metric};
pub use self::engine::{EngineConfig, TaskEngine};
pub use self::heartbeat::{Heartbeat, Shutdown};
pub use self::scheduler::{ScheduleOutcome, TaskScheduler};
pub use self::status::SchedulingMonitor;
