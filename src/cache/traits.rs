use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::services::geoip::GeoLocationRecord;

/// 缓存条目
///
/// 整条写入、整条覆盖，从不部分更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: GeoLocationRecord,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// `expires_at = resolved_at + ttl`
    pub fn new(record: GeoLocationRecord, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = record
            .resolved_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { record, expires_at }
    }

    /// 已过期的条目即使还没被物理淘汰也不能当作有效值
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 条目整体寿命，后端据此设置物理过期
    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.record.resolved_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// 缓存后端（内存、Redis……）
///
/// 只负责按 key 存取；TTL 校验、key 前缀和 singleflight 由 `GeoCache` 负责。
/// 后端故障不应让解析失败：实现应记录日志并退化为未命中。
#[async_trait]
pub trait GeoCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;
    async fn put(&self, key: &str, entry: CacheEntry);
    async fn remove(&self, key: &str);
    async fn clear(&self);

    /// 获取后端名称（用于日志）
    fn name(&self) -> &'static str;
}
