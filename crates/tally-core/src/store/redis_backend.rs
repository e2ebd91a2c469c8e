//! Redis implementation of `KeyValueBackend`.
//!
//! Uses one multiplexed connection; clones of it share the underlying socket,
//! so each call clones the handle instead of holding a lock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::error::StoreError;
use crate::ports::KeyValueBackend;

#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Opens a connection to `url` (e.g. `redis://localhost:6379`) and checks
    /// it answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _: () = self.conn().set(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = self.conn().get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let removed: u64 = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let found: bool = self.conn().exists(key).await?;
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let updated: bool = self.conn().pexpire(key, millis(ttl) as i64).await?;
        Ok(updated)
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let value: u64 = self.conn().incr(key, 1u64).await?;
        Ok(value)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let mut keys: redis::AsyncIter<String> = conn.scan_match(format!("{prefix}*")).await?;
        let mut count = 0u64;
        while keys.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn hset(&self, hash: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        let _: () = self.conn().hset(hash, field, value).await?;
        Ok(())
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = self.conn().hget(hash, field).await?;
        Ok(value)
    }

    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, StoreError> {
        let removed: u64 = self.conn().hdel(hash, field).await?;
        Ok(removed > 0)
    }

    async fn hexists(&self, hash: &str, field: &str) -> Result<bool, StoreError> {
        let found: bool = self.conn().hexists(hash, field).await?;
        Ok(found)
    }

    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let fields: HashMap<String, Vec<u8>> = self.conn().hgetall(hash).await?;
        Ok(fields.into_iter().collect())
    }

    async fn hlen(&self, hash: &str) -> Result<u64, StoreError> {
        let len: u64 = self.conn().hlen(hash).await?;
        Ok(len)
    }
}
