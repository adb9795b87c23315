use async_trait::async_trait;
use tracing::trace;

use crate::cache::{CacheEntry, GeoCacheStore};

/// 不缓存任何内容，每次解析都会访问外部 API
pub struct NullGeoStore;

#[async_trait]
impl GeoCacheStore for NullGeoStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        trace!("NullGeoStore.get called for key: {}", key);
        None
    }

    async fn put(&self, key: &str, _entry: CacheEntry) {
        trace!("NullGeoStore.put called for key: {}", key);
    }

    async fn remove(&self, key: &str) {
        trace!("NullGeoStore.remove called for key: {}", key);
    }

    async fn clear(&self) {
        trace!("NullGeoStore.clear called, but no action taken");
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
