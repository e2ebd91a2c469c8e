//! MemoryBackend - in-process `KeyValueBackend`.
//!
//! Mirrors the subset of Redis semantics `SharedStore` relies on, with expiry
//! driven by a `Clock`. Several `SharedStore`s over one `MemoryBackend` behave
//! like a fleet of exporters sharing one Redis, which is how the claim and
//! reclaim rules are exercised without a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::ports::{Clock, KeyValueBackend, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Locks the table and drops every expired entry.
    fn live_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        entries
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::InvalidValue {
        key: key.to_string(),
        message: "operation against a key holding the wrong kind of value".to_string(),
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        let mut entries = self.live_entries();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.live_entries().insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live_entries().get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_entries().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_entries().contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let deadline = self.deadline(ttl);
        match self.live_entries().get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.live_entries();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Bytes(b"0".to_vec()),
            expires_at: None,
        });
        let Value::Bytes(bytes) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let current: u64 = std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::InvalidValue {
                key: key.to_string(),
                message: "value is not an integer".to_string(),
            })?;
        let next = current + 1;
        *bytes = next.to_string().into_bytes();
        Ok(next)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        Ok(self
            .live_entries()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .count() as u64)
    }

    async fn hset(&self, hash: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.live_entries();
        let entry = entries.entry(hash.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let Value::Hash(fields) = &mut entry.value else {
            return Err(wrong_type(hash));
        };
        fields.insert(field.to_string(), value.to_vec());
        Ok(())
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live_entries().get(hash) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(_) => Err(wrong_type(hash)),
        }
    }

    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, StoreError> {
        match self.live_entries().get_mut(hash) {
            None => Ok(false),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.remove(field).is_some()),
            Some(_) => Err(wrong_type(hash)),
        }
    }

    async fn hexists(&self, hash: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self.hget(hash, field).await?.is_some())
    }

    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        match self.live_entries().get(hash) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Some(_) => Err(wrong_type(hash)),
        }
    }

    async fn hlen(&self, hash: &str) -> Result<u64, StoreError> {
        Ok(self.hgetall(hash).await?.len() as u64)
    }
}
