//! Ports - the seams between the scheduler and its environment.

pub mod backend;
pub mod clock;
pub mod store;

pub use self::backend::KeyValueBackend;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::store::Store;
