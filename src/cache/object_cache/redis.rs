use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};

use crate::cache::{CacheEntry, GeoCacheStore};

/// 每轮 SCAN 的建议数量
const SCAN_BATCH: usize = 200;

/// Redis 缓存后端
///
/// 条目以 JSON 存储，物理过期交给 `SET EX`。
/// 任何 Redis 故障都只记录日志并按未命中处理。
pub struct RedisGeoStore {
    client: redis::Client,
    /// 持久化连接，使用 RwLock 保护
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    /// `clear` 只删除这个前缀下的 key
    namespace: String,
}

impl RedisGeoStore {
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, String> {
        let client =
            redis::Client::open(url).map_err(|e| format!("Invalid Redis URL '{url}': {e}"))?;

        // 启动时确认服务可达，失败就不使用这个后端
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    "Failed to connect to Redis server: {}. Check Redis server status and URL: {}",
                    e, url
                );
                format!("Redis connection failed: {e}")
            })?;

        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(response) => debug!("Redis connection test successful: {}", response),
            Err(e) => {
                error!("Failed to ping Redis server: {}. URL: {}", e, url);
                return Err(format!("Redis ping failed: {e}"));
            }
        }

        debug!("RedisGeoStore created with namespace: '{}'", namespace);

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(Some(conn))),
            namespace: namespace.to_string(),
        })
    }

    /// 获取或建立持久连接
    async fn get_connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // 双重检查，避免竞态条件
        if let Some(ref conn) = *conn_guard {
            return Ok(conn.clone());
        }

        let new_conn = self.client.get_multiplexed_async_connection().await?;
        *conn_guard = Some(new_conn.clone());
        debug!("Redis connection re-established");

        Ok(new_conn)
    }

    /// 重置连接（在连接错误时调用）
    async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        debug!("Redis connection reset due to error");
    }

    async fn connection_or_reset(&self) -> Option<MultiplexedConnection> {
        match self.get_connection().await {
            Ok(c) => Some(c),
            Err(e) => {
                error!("Failed to get Redis connection: {}", e);
                self.reset_connection().await;
                None
            }
        }
    }
}

#[async_trait]
impl GeoCacheStore for RedisGeoStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut conn = self.connection_or_reset().await?;

        let result: redis::RedisResult<Option<String>> = conn.get(key).await;

        match result {
            Ok(Some(data)) => match serde_json::from_str::<CacheEntry>(&data) {
                Ok(entry) => {
                    trace!("Redis hit: {}", key);
                    Some(entry)
                }
                Err(e) => {
                    error!("Failed to deserialize cache entry for key '{}': {}", key, e);
                    None
                }
            },
            Ok(None) => {
                trace!("Redis miss: {}", key);
                None
            }
            Err(e) => {
                error!("Failed to get key '{}': {}", key, e);
                self.reset_connection().await;
                None
            }
        }
    }

    async fn put(&self, key: &str, entry: CacheEntry) {
        // SET EX 不接受 0
        let ttl_secs = entry.ttl().as_secs().max(1);

        let payload = match serde_json::to_string(&entry) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize cache entry for key '{}': {}", key, e);
                return;
            }
        };

        let Some(mut conn) = self.connection_or_reset().await else {
            return;
        };

        match conn
            .set_ex::<&str, String, ()>(key, payload, ttl_secs)
            .await
        {
            Ok(_) => trace!("Stored key in Redis: {} (ttl {}s)", key, ttl_secs),
            Err(e) => {
                error!("Failed to store key '{}' in Redis: {}", key, e);
                self.reset_connection().await;
            }
        }
    }

    async fn remove(&self, key: &str) {
        let Some(mut conn) = self.connection_or_reset().await else {
            return;
        };

        match conn.del::<&str, i32>(key).await {
            Ok(deleted) if deleted > 0 => trace!("Removed key from Redis: {}", key),
            Ok(_) => trace!("Key not found in Redis for removal: {}", key),
            Err(e) => {
                error!("Failed to remove key '{}': {}", key, e);
                self.reset_connection().await;
            }
        }
    }

    async fn clear(&self) {
        if self.namespace.is_empty() {
            warn!("RedisGeoStore refuses to clear without a key namespace");
            return;
        }

        let Some(mut conn) = self.connection_or_reset().await else {
            return;
        };

        let pattern = format!("{}*", self.namespace);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let scanned = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await;

            let (next, keys) = match scanned {
                Ok(v) => v,
                Err(e) => {
                    error!("Failed to scan Redis keys '{}': {}", pattern, e);
                    self.reset_connection().await;
                    return;
                }
            };

            if !keys.is_empty() {
                match conn.del::<Vec<String>, usize>(keys).await {
                    Ok(n) => removed += n,
                    Err(e) => {
                        error!("Failed to delete scanned Redis keys: {}", e);
                        self.reset_connection().await;
                        return;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Cleared {} Redis keys under '{}'", removed, self.namespace);
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = RedisGeoStore::connect("not-a-redis-url", "geo:ip:").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server on localhost"]
    async fn test_roundtrip_against_local_redis() {
        use crate::services::geoip::GeoLocationRecord;
        use std::time::Duration;

        let store = RedisGeoStore::connect("redis://127.0.0.1:6379/", "geo:test:")
            .await
            .unwrap();
        let ip = crate::utils::ip::validate("8.8.8.8").unwrap();
        let record = GeoLocationRecord::from_provider(&ip, serde_json::Map::new(), chrono::Utc::now());
        let entry = CacheEntry::new(record, Duration::from_secs(30));

        store.put("geo:test:8.8.8.8", entry.clone()).await;
        assert_eq!(store.get("geo:test:8.8.8.8").await, Some(entry));

        store.clear().await;
        assert!(store.get("geo:test:8.8.8.8").await.is_none());
    }
}
