//! SharedStore - the store several exporter instances coordinate through.
//!
//! Key layout on the backend:
//! - `task:{task_type}:{instance_id}` holds the owning process id.
//! - `keepalive:{process_id}` is the heartbeat record, expiring after its TTL.
//! - `tasksExecutedCount` is the executed-task counter.
//! - hash `metrics` maps metric keys to msgpack-encoded metrics.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::{Metric, MetricKey, Metrics, ProcessId, TaskType};
use crate::error::StoreError;
use crate::ports::{KeyValueBackend, Store};

const METRICS_HASH: &str = "metrics";
const EXECUTED_TASKS_KEY: &str = "tasksExecutedCount";
const TASK_PREFIX: &str = "task:";
const KEEPALIVE_PREFIX: &str = "keepalive:";

fn task_key(task_type: &TaskType, instance_id: &str) -> String {
    format!("{TASK_PREFIX}{task_type}:{instance_id}")
}

fn keepalive_key(process_id: &str) -> String {
    format!("{KEEPALIVE_PREFIX}{process_id}")
}

pub struct SharedStore<B> {
    backend: B,
}

impl<B: KeyValueBackend> SharedStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: KeyValueBackend> Store for SharedStore<B> {
    async fn metrics(&self) -> Result<Metrics, StoreError> {
        let mut metrics = Metrics::new();
        for (field, raw) in self.backend.hgetall(METRICS_HASH).await? {
            let metric: Metric = rmp_serde::from_slice(&raw)?;
            metrics.insert(MetricKey::from(field), metric);
        }
        Ok(metrics)
    }

    async fn set_metric(&self, metric: Metric) -> Result<(), StoreError> {
        let raw = rmp_serde::to_vec_named(&metric)?;
        self.backend
            .hset(METRICS_HASH, metric.key().as_str(), &raw)
            .await
    }

    async fn get_metric(&self, key: &MetricKey) -> Result<Option<Metric>, StoreError> {
        match self.backend.hget(METRICS_HASH, key.as_str()).await? {
            Some(raw) => Ok(Some(rmp_serde::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn del_metric(&self, key: &MetricKey) -> Result<(), StoreError> {
        self.backend.hdel(METRICS_HASH, key.as_str()).await?;
        Ok(())
    }

    async fn metric_exists(&self, key: &MetricKey) -> Result<bool, StoreError> {
        self.backend.hexists(METRICS_HASH, key.as_str()).await
    }

    async fn metrics_count(&self) -> Result<u64, StoreError> {
        self.backend.hlen(METRICS_HASH).await
    }

    async fn queue_task(
        &self,
        task_type: &TaskType,
        instance_id: &str,
        process_id: &ProcessId,
    ) -> Result<bool, StoreError> {
        let key = task_key(task_type, instance_id);
        let me = process_id.to_string();

        if self.backend.set_nx(&key, me.as_bytes(), None).await? {
            return Ok(true);
        }

        let Some(owner) = self.backend.get(&key).await? else {
            // released between the two calls
            return self.backend.set_nx(&key, me.as_bytes(), None).await;
        };
        let owner = String::from_utf8(owner).map_err(|_| StoreError::InvalidValue {
            key: key.clone(),
            message: "claim owner is not valid utf-8".to_string(),
        })?;

        if owner == me {
            debug!(task_type = %task_type, task_instance_id = instance_id, "task already claimed by this process");
            return Ok(false);
        }
        if self.backend.exists(&keepalive_key(&owner)).await? {
            return Ok(false);
        }

        warn!(
            task_type = %task_type,
            task_instance_id = instance_id,
            previous_owner = %owner,
            process_id = %process_id,
            "claim owner has no heartbeat, taking the claim over"
        );
        self.backend.set(&key, me.as_bytes()).await?;
        Ok(true)
    }

    async fn unqueue_task(&self, task_type: &TaskType, instance_id: &str) -> Result<(), StoreError> {
        if self.backend.del(&task_key(task_type, instance_id)).await? {
            self.backend.incr(EXECUTED_TASKS_KEY).await?;
        }
        Ok(())
    }

    async fn currently_queued_tasks_count(&self) -> Result<u64, StoreError> {
        self.backend.count_prefix(TASK_PREFIX).await
    }

    async fn executed_tasks_count(&self) -> Result<u64, StoreError> {
        let Some(raw) = self.backend.get(EXECUTED_TASKS_KEY).await? else {
            return Ok(0);
        };
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::InvalidValue {
                key: EXECUTED_TASKS_KEY.to_string(),
                message: "counter is not an integer".to_string(),
            })
    }

    async fn set_heartbeat(&self, process_id: &ProcessId, ttl: Duration) -> Result<bool, StoreError> {
        let key = keepalive_key(&process_id.to_string());
        if self.backend.set_nx(&key, b"1", Some(ttl)).await? {
            return Ok(true);
        }
        // Refresh in place. If the record expired in between, recreate it.
        if self.backend.expire(&key, ttl).await? {
            return Ok(false);
        }
        self.backend.set_nx(&key, b"1", Some(ttl)).await
    }

    async fn heartbeat_exists(&self, process_id: &ProcessId) -> Result<bool, StoreError> {
        self.backend
            .exists(&keepalive_key(&process_id.to_string()))
            .await
    }

    fn is_shared(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MetricKind, labels};
    use crate::ports::FixedClock;
    use crate::store::MemoryBackend;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(10);

    struct Fleet {
        clock: Arc<FixedClock>,
        a: SharedStore<MemoryBackend>,
        b: SharedStore<MemoryBackend>,
        pa: ProcessId,
        pb: ProcessId,
    }

    /// Two processes over one backend, both with a live heartbeat.
    async fn fleet() -> Fleet {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let backend = MemoryBackend::with_clock(clock.clone());
        let fleet = Fleet {
            a: SharedStore::new(backend.clone()),
            b: SharedStore::new(backend),
            pa: ProcessId::generate(clock.as_ref()),
            pb: ProcessId::generate(clock.as_ref()),
            clock,
        };
        fleet.a.set_heartbeat(&fleet.pa, TTL).await.unwrap();
        fleet.b.set_heartbeat(&fleet.pb, TTL).await.unwrap();
        fleet
    }

    #[tokio::test]
    async fn metrics_survive_the_encoding() {
        let f = fleet().await;
        let m = Metric::new(MetricKind::new(3), labels([("status", "idle")]), 1.0);
        f.a.set_metric(m.clone()).await.unwrap();

        assert_eq!(f.b.get_metric(&m.key()).await.unwrap(), Some(m.clone()));
        assert!(f.b.metric_exists(&m.key()).await.unwrap());
        assert_eq!(f.b.metrics_count().await.unwrap(), 1);
        assert_eq!(f.b.metrics().await.unwrap().get(&m.key()), Some(&m));

        f.b.del_metric(&m.key()).await.unwrap();
        assert_eq!(f.a.metrics_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn only_one_live_process_gets_the_claim() {
        let f = fleet().await;
        let tt = TaskType::new("pull");

        let first = f.a.queue_task(&tt, "_", &f.pa).await.unwrap();
        let second = f.b.queue_task(&tt, "_", &f.pb).await.unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(f.b.currently_queued_tasks_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_processes_get_exactly_one_claim() {
        let f = Arc::new(fleet().await);
        let tt = TaskType::new("pull");

        for round in 0..50 {
            let instance = format!("repo-{round}");
            let (fa, ta, ia) = (Arc::clone(&f), tt.clone(), instance.clone());
            let (fb, tb, ib) = (Arc::clone(&f), tt.clone(), instance);
            let a = tokio::spawn(async move { fa.a.queue_task(&ta, &ia, &fa.pa).await.unwrap() });
            let b = tokio::spawn(async move { fb.b.queue_task(&tb, &ib, &fb.pb).await.unwrap() });
            let (a, b) = tokio::join!(a, b);
            let winners = [a.unwrap(), b.unwrap()].into_iter().filter(|claimed| *claimed).count();
            assert_eq!(winners, 1, "round {round}");
        }
        assert_eq!(f.a.currently_queued_tasks_count().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn claim_written_before_the_owner_heartbeat_is_not_protected() {
        let f = fleet().await;
        let tt = TaskType::new("pull");
        let late = ProcessId::generate(f.clock.as_ref());

        assert!(f.a.queue_task(&tt, "_", &late).await.unwrap());
        assert!(f.b.queue_task(&tt, "_", &f.pb).await.unwrap());

        // once the owner has a record, the claim holds
        f.b.unqueue_task(&tt, "_").await.unwrap();
        f.a.set_heartbeat(&late, TTL).await.unwrap();
        assert!(f.a.queue_task(&tt, "_", &late).await.unwrap());
        assert!(!f.b.queue_task(&tt, "_", &f.pb).await.unwrap());
    }

    #[tokio::test]
    async fn owner_does_not_claim_twice() {
        let f = fleet().await;
        let tt = TaskType::new("pull");
        assert!(f.a.queue_task(&tt, "_", &f.pa).await.unwrap());
        assert!(!f.a.queue_task(&tt, "_", &f.pa).await.unwrap());
    }

    #[tokio::test]
    async fn claim_of_a_dead_owner_is_taken_over() {
        let f = fleet().await;
        let tt = TaskType::new("pull");
        assert!(f.a.queue_task(&tt, "_", &f.pa).await.unwrap());

        // b keeps beating, a stops
        f.clock.advance(Duration::from_secs(6));
        f.b.set_heartbeat(&f.pb, TTL).await.unwrap();
        f.clock.advance(Duration::from_secs(6));

        assert!(!f.a.heartbeat_exists(&f.pa).await.unwrap());
        assert!(f.b.queue_task(&tt, "_", &f.pb).await.unwrap());
        assert_eq!(f.b.currently_queued_tasks_count().await.unwrap(), 1);

        // the old owner finishing late drops b's claim, once
        f.a.unqueue_task(&tt, "_").await.unwrap();
        f.b.unqueue_task(&tt, "_").await.unwrap();
        assert_eq!(f.a.executed_tasks_count().await.unwrap(), 1);
        assert_eq!(f.a.currently_queued_tasks_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn executed_count_starts_at_zero() {
        let f = fleet().await;
        assert_eq!(f.a.executed_tasks_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn heartbeat_refresh_keeps_the_record_alive() {
        let f = fleet().await;
        f.clock.advance(Duration::from_secs(8));
        assert!(!f.a.set_heartbeat(&f.pa, TTL).await.unwrap());
        f.clock.advance(Duration::from_secs(8));
        assert!(f.a.heartbeat_exists(&f.pa).await.unwrap());

        f.clock.advance(Duration::from_secs(3));
        assert!(!f.a.heartbeat_exists(&f.pa).await.unwrap());
        assert!(f.a.set_heartbeat(&f.pa, TTL).await.unwrap());
    }

    #[test]
    fn keys_follow_the_layout() {
        assert_eq!(task_key(&TaskType::new("pull"), "_"), "task:pull:_");
        assert_eq!(keepalive_key("process-x"), "keepalive:process-x");
    }
}
