//! Collector declarations.
//!
//! A collector is declared once per `MetricKind`, together with how stored
//! values are applied to it (`Semantic`). The export path dispatches on that
//! tag, never on the collector's concrete type.

use std::collections::HashMap;

use crate::domain::MetricKind;

use super::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// Stored value replaces the sample.
    Gauge,
    /// Stored value is added to the sample.
    Counter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSpec {
    pub kind: MetricKind,
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub semantic: Semantic,
}

impl CollectorSpec {
    pub fn gauge(kind: MetricKind, name: &str, help: &str, label_names: &[&str]) -> Self {
        Self::new(kind, name, help, label_names, Semantic::Gauge)
    }

    pub fn counter(kind: MetricKind, name: &str, help: &str, label_names: &[&str]) -> Self {
        Self::new(kind, name, help, label_names, Semantic::Counter)
    }

    fn new(kind: MetricKind, name: &str, help: &str, label_names: &[&str], semantic: Semantic) -> Self {
        Self {
            kind,
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            semantic,
        }
    }
}

/// Declared collectors, keyed by kind. Built at startup, read on each scrape.
#[derive(Debug, Clone, Default)]
pub struct CollectorSet {
    specs: HashMap<MetricKind, CollectorSpec>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CollectorSpec) -> Result<(), RegistryError> {
        if self.specs.contains_key(&spec.kind) {
            return Err(RegistryError::DuplicateKind(spec.kind));
        }
        if self.specs.values().any(|s| s.name == spec.name) || is_internal_name(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }
        self.specs.insert(spec.kind, spec);
        Ok(())
    }

    pub fn get(&self, kind: MetricKind) -> Option<&CollectorSpec> {
        self.specs.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectorSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

pub const CURRENTLY_QUEUED_TASKS_COUNT: &str = "tally_currently_queued_tasks_count";
pub const EXECUTED_TASKS_COUNT: &str = "tally_executed_tasks_count";
pub const METRICS_COUNT: &str = "tally_metrics_count";
pub const FAILED_TASKS_COUNT: &str = "tally_failed_tasks_count";

/// Name and help of the scheduler's own gauges.
pub const INTERNAL_GAUGES: [(&str, &str); 4] = [
    (CURRENTLY_QUEUED_TASKS_COUNT, "Number of tasks in the queue"),
    (EXECUTED_TASKS_COUNT, "Number of tasks executed"),
    (METRICS_COUNT, "Number of metrics being exported"),
    (FAILED_TASKS_COUNT, "Number of task runs that failed in this process"),
];

fn is_internal_name(name: &str) -> bool {
    INTERNAL_GAUGES.iter().any(|(internal, _)| *internal == name)
}
