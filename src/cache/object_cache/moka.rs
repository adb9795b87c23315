use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use tracing::debug;

use crate::cache::{CacheEntry, GeoCacheStore};

/// 过期策略，基于条目自身的 TTL（expires_at - resolved_at）
struct GeoEntryExpiry;

impl Expiry<String, CacheEntry> for GeoEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl())
    }

    // 强制刷新会覆盖旧值，TTL 从新值重新计算
    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl())
    }
}

/// 进程内 Moka 缓存
///
/// - LRU 淘汰策略，容量由配置决定
/// - 每个条目按自身 TTL 物理过期
pub struct MokaGeoStore {
    inner: Cache<String, CacheEntry>,
}

impl MokaGeoStore {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(GeoEntryExpiry)
            .build();

        debug!("MokaGeoStore initialized with max capacity: {}", max_capacity);
        Self { inner }
    }
}

#[async_trait]
impl GeoCacheStore for MokaGeoStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, entry: CacheEntry) {
        self.inner.insert(key.to_string(), entry).await;
    }

    async fn remove(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    async fn clear(&self) {
        self.inner.invalidate_all();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
