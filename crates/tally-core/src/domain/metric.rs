//! Metric model.
//!
//! A metric is identified by its kind and its full label set. The storage key
//! is derived from both, so two metrics of the same kind with different labels
//! never overwrite each other.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Closed set of metric kinds, declared as constants by the modules that
/// register collectors for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKind(u32);

impl MetricKind {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Label set, kept sorted by name.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(String);

impl MetricKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MetricKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub kind: MetricKind,
    #[serde(default)]
    pub labels: Labels,
    pub value: f64,
}

impl Metric {
    pub fn new(kind: MetricKind, labels: Labels, value: f64) -> Self {
        Self {
            kind,
            labels,
            value,
        }
    }

    /// Metric without labels.
    pub fn unlabeled(kind: MetricKind, value: f64) -> Self {
        Self::new(kind, Labels::new(), value)
    }

    /// Storage key: `{kind}{"name"="value",...}` with labels in name order.
    /// Names and values are written quoted and escaped, so the encoding is
    /// injective.
    pub fn key(&self) -> MetricKey {
        Self::key_for(self.kind, &self.labels)
    }

    pub fn key_for(kind: MetricKind, labels: &Labels) -> MetricKey {
        let labels = labels
            .iter()
            .map(|(name, value)| format!("{name:?}={value:?}"))
            .collect::<Vec<_>>()
            .join(",");
        MetricKey(format!("{kind}{{{labels}}}"))
    }
}

pub type Metrics = HashMap<MetricKey, Metric>;

/// Builds a `Labels` map from string pairs.
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
