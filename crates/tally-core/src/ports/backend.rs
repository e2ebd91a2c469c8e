//! KeyValueBackend port - the primitives `SharedStore` is built on.
//!
//! Every method is a single atomic operation on the backend. `SharedStore`
//! composes them; no method here is a read-modify-write done client side.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Sets `key` only if it does not exist, optionally with an expiry.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StoreError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Returns whether a key was removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Resets the expiry of an existing key. Returns `false` if it is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;
    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    async fn hset(&self, hash: &str, field: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, StoreError>;
    async fn hexists(&self, hash: &str, field: &str) -> Result<bool, StoreError>;
    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
    async fn hlen(&self, hash: &str) -> Result<u64, StoreError>;
}
