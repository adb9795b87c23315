//! 缓存后端实现与按配置选择后端

pub mod moka;
pub mod null;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::GeoCacheStore;
use crate::config::{CacheConfig, CacheType};

pub use self::moka::MokaGeoStore;
pub use self::null::NullGeoStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisGeoStore;

/// 根据 `cache.type` 创建后端
pub async fn create_store(config: &CacheConfig) -> Result<Arc<dyn GeoCacheStore>, String> {
    let store: Arc<dyn GeoCacheStore> = match config.cache_type {
        CacheType::Memory => Arc::new(MokaGeoStore::new(config.memory.max_capacity)),
        CacheType::Null => {
            warn!("Geolocation cache disabled, every resolution will call the provider");
            Arc::new(NullGeoStore)
        }
        #[cfg(feature = "redis")]
        CacheType::Redis => {
            Arc::new(RedisGeoStore::connect(&config.redis.url, &config.key_prefix).await?)
        }
        #[cfg(not(feature = "redis"))]
        CacheType::Redis => {
            return Err("cache type 'redis' requires the `redis` feature".to_string());
        }
    };

    info!("Geolocation cache backend: {}", store.name());
    Ok(store)
}
