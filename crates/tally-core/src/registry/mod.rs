//! Export registry.
//!
//! A `Registry` is built fresh for every scrape from the declared
//! `CollectorSet`, fed with the stored metrics and the scheduler's own
//! counters, then rendered. Nothing carries over between scrapes, so a metric
//! deleted from the store disappears from the next scrape.

pub mod collectors;
pub mod encode;
pub mod status;

use std::collections::HashMap;

use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, Gauge, GaugeVec, Opts};
use thiserror::Error;
use tracing::warn;

use crate::domain::{Metric, MetricKind, Metrics};
use crate::error::StoreError;
use crate::ports::Store;

pub use self::collectors::{CollectorSet, CollectorSpec, Semantic};
pub use self::encode::{Format, Rendered};
pub use self::status::emit_status_metric;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("collector already declared for metric kind {0}")]
    DuplicateKind(MetricKind),

    #[error("collector name {0} is already in use")]
    DuplicateName(String),

    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("encoding scrape: {0}")]
    Encode(String),
}

enum Collector {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

struct Registered {
    name: String,
    label_names: Vec<String>,
    collector: Collector,
}

struct InternalGauges {
    queued: Gauge,
    executed: Gauge,
    metrics: Gauge,
    failed: Gauge,
}

pub struct Registry {
    inner: prometheus::Registry,
    collectors: HashMap<MetricKind, Registered>,
    internal: InternalGauges,
}

impl Registry {
    pub fn new(set: &CollectorSet) -> Result<Self, RegistryError> {
        let inner = prometheus::Registry::new();

        let mut collectors = HashMap::with_capacity(set.len());
        for spec in set.iter() {
            let opts = Opts::new(spec.name.clone(), spec.help.clone());
            let label_names: Vec<&str> = spec.label_names.iter().map(String::as_str).collect();
            let collector = match spec.semantic {
                Semantic::Gauge => {
                    let vec = GaugeVec::new(opts, &label_names)?;
                    inner.register(Box::new(vec.clone()))?;
                    Collector::Gauge(vec)
                }
                Semantic::Counter => {
                    let vec = CounterVec::new(opts, &label_names)?;
                    inner.register(Box::new(vec.clone()))?;
                    Collector::Counter(vec)
                }
            };
            collectors.insert(
                spec.kind,
                Registered {
                    name: spec.name.clone(),
                    label_names: spec.label_names.clone(),
                    collector,
                },
            );
        }

        let [queued, executed, metrics, failed] =
            collectors::INTERNAL_GAUGES.map(|(name, help)| Gauge::new(name, help));
        let internal = InternalGauges {
            queued: queued?,
            executed: executed?,
            metrics: metrics?,
            failed: failed?,
        };
        for gauge in [&internal.queued, &internal.executed, &internal.metrics, &internal.failed] {
            inner.register(Box::new(gauge.clone()))?;
        }

        Ok(Self {
            inner,
            collectors,
            internal,
        })
    }

    /// Applies every stored metric to the collector of its kind. Metrics that
    /// cannot be applied are logged and skipped; the scrape goes on.
    pub fn export_metrics(&self, metrics: &Metrics) {
        for metric in metrics.values() {
            self.export_metric(metric);
        }
    }

    fn export_metric(&self, metric: &Metric) {
        let Some(registered) = self.collectors.get(&metric.kind) else {
            warn!(metric_kind = %metric.kind, "no collector declared for metric kind, skipping");
            return;
        };

        let declared = registered.label_names.len() == metric.labels.len()
            && registered.label_names.iter().all(|name| metric.labels.contains_key(name));
        if !declared {
            warn!(
                metric_kind = %metric.kind,
                collector = %registered.name,
                labels = ?metric.labels.keys().collect::<Vec<_>>(),
                "metric labels do not match the collector, skipping"
            );
            return;
        }
        let values: Vec<&str> = registered
            .label_names
            .iter()
            .map(|name| metric.labels.get(name).map(String::as_str).unwrap_or_default())
            .collect();

        match &registered.collector {
            Collector::Gauge(vec) => match vec.get_metric_with_label_values(&values) {
                Ok(gauge) => gauge.set(metric.value),
                Err(err) => warn!(collector = %registered.name, error = %err, "exporting gauge failed"),
            },
            Collector::Counter(vec) => {
                if metric.value < 0.0 {
                    warn!(collector = %registered.name, value = metric.value, "negative counter value, skipping");
                    return;
                }
                match vec.get_metric_with_label_values(&values) {
                    Ok(counter) => counter.inc_by(metric.value),
                    Err(err) => warn!(collector = %registered.name, error = %err, "exporting counter failed"),
                }
            }
        }
    }

    /// Feeds the scheduler gauges from the store. `failed_tasks` is local to
    /// this process and is set even when the store cannot be read.
    pub async fn export_internal_metrics(&self, store: &dyn Store, failed_tasks: u64) -> Result<(), StoreError> {
        self.internal.failed.set(failed_tasks as f64);
        let queued = store.currently_queued_tasks_count().await?;
        let executed = store.executed_tasks_count().await?;
        let metrics = store.metrics_count().await?;

        self.internal.queued.set(queued as f64);
        self.internal.executed.set(executed as f64);
        self.internal.metrics.set(metrics as f64);
        Ok(())
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    pub fn render(&self, format: Format) -> Result<Rendered, RegistryError> {
        encode::encode(&self.gather(), format)
    }

    /// Number of samples currently held by declared (non-internal) collectors.
    pub fn sample_count(&self) -> usize {
        self.collectors
            .values()
            .map(|registered| match &registered.collector {
                Collector::Gauge(vec) => vec.collect(),
                Collector::Counter(vec) => vec.collect(),
            })
            .flat_map(|families| families.into_iter())
            .map(|family| family.get_metric().len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessId, TaskType, labels};
    use crate::ports::SystemClock;
    use crate::store::LocalStore;

    const QUEUE: MetricKind = MetricKind::new(1);
    const PROCESSED: MetricKind = MetricKind::new(2);
    const STATUS: MetricKind = MetricKind::new(3);
    const UNDECLARED: MetricKind = MetricKind::new(99);

    fn collector_set() -> CollectorSet {
        let mut set = CollectorSet::new();
        set.register(CollectorSpec::gauge(QUEUE, "queue_length", "Queue length", &[]))
            .unwrap();
        set.register(CollectorSpec::counter(PROCESSED, "processed_total", "Processed", &[]))
            .unwrap();
        set.register(CollectorSpec::gauge(STATUS, "worker_status", "Status", &["status"]))
            .unwrap();
        set
    }

    fn metrics(items: Vec<Metric>) -> Metrics {
        items.into_iter().map(|m| (m.key(), m)).collect()
    }

    fn render(registry: &Registry) -> String {
        registry.render(Format::Prometheus).unwrap().body
    }

    #[test]
    fn gauges_are_set_and_counters_added() {
        let registry = Registry::new(&collector_set()).unwrap();
        registry.export_metrics(&metrics(vec![
            Metric::unlabeled(QUEUE, 7.0),
            Metric::unlabeled(PROCESSED, 42.0),
            Metric::new(STATUS, labels([("status", "busy")]), 1.0),
            Metric::new(STATUS, labels([("status", "idle")]), 0.0),
        ]));

        let text = render(&registry);
        assert!(text.contains("# TYPE queue_length gauge"));
        assert!(text.contains("queue_length 7"));
        assert!(text.contains("# TYPE processed_total counter"));
        assert!(text.contains("processed_total 42"));
        assert!(text.contains(r#"worker_status{status="busy"} 1"#));
        assert!(text.contains(r#"worker_status{status="idle"} 0"#));
        assert_eq!(registry.sample_count(), 4);
    }

    #[test]
    fn unusable_metrics_are_skipped() {
        let registry = Registry::new(&collector_set()).unwrap();
        registry.export_metrics(&metrics(vec![
            Metric::unlabeled(UNDECLARED, 1.0),
            Metric::new(QUEUE, labels([("repo", "a")]), 1.0),
            Metric::unlabeled(STATUS, 1.0),
            Metric::unlabeled(PROCESSED, -3.0),
            Metric::unlabeled(QUEUE, 2.0),
        ]));

        assert_eq!(registry.sample_count(), 1);
        assert!(render(&registry).contains("queue_length 2"));
    }

    #[tokio::test]
    async fn internal_gauges_follow_the_store() {
        let store = LocalStore::new();
        let pull = TaskType::new("pull");
        let me = ProcessId::generate(&SystemClock);
        store.queue_task(&pull, "a", &me).await.unwrap();
        store.queue_task(&pull, "b", &me).await.unwrap();
        store.unqueue_task(&pull, "a").await.unwrap();
        store.set_metric(Metric::unlabeled(QUEUE, 1.0)).await.unwrap();

        let registry = Registry::new(&collector_set()).unwrap();
        registry.export_internal_metrics(&store, 2).await.unwrap();

        let text = render(&registry);
        assert!(text.contains("tally_failed_tasks_count 2"));
        assert!(text.contains("tally_currently_queued_tasks_count 1"));
        assert!(text.contains("tally_executed_tasks_count 1"));
        assert!(text.contains("tally_metrics_count 1"));
    }

    #[test]
    fn each_scrape_starts_from_zero() {
        let set = collector_set();
        let first = Registry::new(&set).unwrap();
        first.export_metrics(&metrics(vec![Metric::unlabeled(PROCESSED, 5.0)]));
        let second = Registry::new(&set).unwrap();
        second.export_metrics(&metrics(vec![Metric::unlabeled(PROCESSED, 5.0)]));

        assert!(render(&second).contains("processed_total 5"));
    }
}
