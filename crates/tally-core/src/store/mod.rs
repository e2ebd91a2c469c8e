//! Store implementations.
//!
//! - `LocalStore`: in-process tables, used when no Redis URL is configured.
//! - `SharedStore<B>`: claim/heartbeat protocol over a `KeyValueBackend`.
//! - `RedisBackend` / `MemoryBackend`: the backends `SharedStore` runs on.

mod local;
mod memory;
mod redis_backend;
mod shared;

use std::sync::Arc;

pub use self::local::LocalStore;
pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;
pub use self::shared::SharedStore;

use crate::error::StoreError;
use crate::ports::Store;

/// Picks the store for a deployment: shared over Redis when a URL is given,
/// local otherwise.
pub async fn connect(redis_url: Option<&str>) -> Result<Arc<dyn Store>, StoreError> {
    match redis_url.filter(|url| !url.is_empty()) {
        Some(url) => {
            let backend = RedisBackend::connect(url).await?;
            tracing::info!("using redis store");
            Ok(Arc::new(SharedStore::new(backend)))
        }
        None => {
            tracing::info!("using local store");
            Ok(Arc::new(LocalStore::new()))
        }
    }
}
