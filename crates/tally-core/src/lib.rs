//! tally-core
//!
//! Metrics exporter core: a distributed task scheduler that claims periodic
//! tasks through a shared store, and the export pipeline that turns stored
//! metrics into a scrape.
//!
//! # Modules
//! - **domain**: task types, process ids, metrics, scheduling status
//! - **ports**: `Store`, `KeyValueBackend`, `Clock`
//! - **store**: `LocalStore`, `SharedStore` over Redis or memory
//! - **runtime**: task handlers and their registry
//! - **app**: engine, scheduler, heartbeat, controller, HTTP
//! - **registry**: collectors, export and rendering
//! - **config**: `tally.yml`
//! - **renovate**: the Mend Renovate status exporter

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod registry;
pub mod renovate;
pub mod runtime;
pub mod store;

pub use error::{ErrorKind, StoreError, TallyError};
