//! 带 TTL 与 singleflight 的地理位置缓存
//!
//! - key 为 `前缀 + 规范化 IP`
//! - 过期以注入的 `Clock` 为准，读到过期条目时顺手删除
//! - 同一 IP 同时只有一个计算在进行，其余调用者等待同一结果
//! - 只缓存成功结果

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use crate::cache::{CacheEntry, GeoCacheStore};
use crate::errors::GeoLocationError;
use crate::services::geoip::GeoLocationRecord;
use crate::system::clock::Clock;
use crate::utils::ip::ValidIp;

type Flight = Shared<BoxFuture<'static, Result<GeoLocationRecord, GeoLocationError>>>;

struct GeoCacheInner {
    store: Arc<dyn GeoCacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key_prefix: String,
    in_flight: DashMap<String, Flight>,
}

impl GeoCacheInner {
    async fn lookup(&self, key: &str) -> Option<GeoLocationRecord> {
        let entry = self.store.get(key).await?;
        if entry.is_expired(self.clock.now()) {
            trace!("Cache entry expired: {}", key);
            self.store.remove(key).await;
            return None;
        }
        Some(entry.record)
    }

    async fn store(&self, key: &str, record: GeoLocationRecord) {
        if self.ttl.is_zero() {
            return;
        }
        self.store.put(key, CacheEntry::new(record, self.ttl)).await;
    }
}

/// 计算任务结束（含 panic）时把自己从注册表移除
struct FlightGuard {
    inner: Arc<GeoCacheInner>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct GeoCache {
    inner: Arc<GeoCacheInner>,
}

impl GeoCache {
    pub fn new(
        store: Arc<dyn GeoCacheStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        key_prefix: impl Into<String>,
    ) -> Self {
        let key_prefix = key_prefix.into();
        debug!(
            "GeoCache created: backend={}, ttl={:?}, prefix='{}'",
            store.name(),
            ttl,
            key_prefix
        );
        Self {
            inner: Arc::new(GeoCacheInner {
                store,
                clock,
                ttl,
                key_prefix,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn key_for(&self, ip: &ValidIp) -> String {
        format!("{}{}", self.inner.key_prefix, ip.as_key())
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.store.name()
    }

    /// 未过期的缓存值
    pub async fn get(&self, ip: &ValidIp) -> Option<GeoLocationRecord> {
        self.inner.lookup(&self.key_for(ip)).await
    }

    /// 整条覆盖写入；TTL 为 0 时不写
    pub async fn put(&self, ip: &ValidIp, record: GeoLocationRecord) {
        self.inner.store(&self.key_for(ip), record).await;
    }

    /// 删除缓存；不存在时什么也不做
    pub async fn invalidate(&self, ip: &ValidIp) {
        self.inner.store.remove(&self.key_for(ip)).await;
    }

    pub async fn clear(&self) {
        self.inner.store.clear().await;
    }

    /// 正在进行的计算数
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// 读缓存，未命中时计算并写回
    ///
    /// 同一 key 的并发调用共享一次 `compute`；失败结果会传给所有等待者，但不写缓存。
    pub async fn get_or_compute<F, Fut>(
        &self,
        ip: &ValidIp,
        compute: F,
    ) -> Result<GeoLocationRecord, GeoLocationError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<GeoLocationRecord, GeoLocationError>> + Send + 'static,
    {
        let key = self.key_for(ip);

        let flight = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                trace!("Joining in-flight resolution for {}", key);
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                // 计算放进独立任务：等待者全部取消时也会跑完并清理注册表
                let task = tokio::spawn(async move {
                    let _guard = FlightGuard {
                        inner: Arc::clone(&inner),
                        key: key.clone(),
                    };

                    // 排队期间可能已有别的计算写入
                    if let Some(record) = inner.lookup(&key).await {
                        return Ok(record);
                    }

                    let record = compute().await?;
                    inner.store(&key, record.clone()).await;
                    Ok(record)
                });

                let flight = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(GeoLocationError::connection_error(format!(
                            "Geolocation lookup task failed: {}",
                            e
                        )))
                    })
                }
                .boxed()
                .shared();

                slot.insert(flight.clone());
                flight
            }
        };

        flight.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::object_cache::MokaGeoStore;
    use crate::system::clock::ManualClock;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_with(ttl_secs: u64) -> (GeoCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = GeoCache::new(
            Arc::new(MokaGeoStore::new(1_000)),
            clock.clone(),
            Duration::from_secs(ttl_secs),
            "geo:ip:",
        );
        (cache, clock)
    }

    fn record(ip: &ValidIp, clock: &ManualClock, city: &str) -> GeoLocationRecord {
        let mut raw = serde_json::Map::new();
        raw.insert("city".into(), city.into());
        GeoLocationRecord::from_provider(ip, raw, clock.now())
    }

    fn ip(s: &str) -> ValidIp {
        crate::utils::ip::validate(s).unwrap()
    }

    #[test]
    fn test_key_uses_prefix_and_canonical_ip() {
        let (cache, _) = cache_with(60);
        assert_eq!(cache.key_for(&ip("8.8.8.8")), "geo:ip:8.8.8.8");
        assert_eq!(
            cache.key_for(&ip("2001:4860:4860:0:0:0:0:8888")),
            "geo:ip:2001:4860:4860::8888"
        );
    }

    #[tokio::test]
    async fn test_entry_expires_by_clock() {
        let (cache, clock) = cache_with(3600);
        let addr = ip("8.8.8.8");
        cache.put(&addr, record(&addr, &clock, "Mountain View")).await;

        clock.advance(TimeDelta::seconds(3599));
        assert!(cache.get(&addr).await.is_some());

        clock.advance(TimeDelta::seconds(1));
        assert!(cache.get(&addr).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_stores() {
        let (cache, clock) = cache_with(0);
        let addr = ip("8.8.8.8");
        cache.put(&addr, record(&addr, &clock, "X")).await;
        assert!(cache.get(&addr).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry_and_is_idempotent() {
        let (cache, clock) = cache_with(60);
        let addr = ip("1.1.1.1");
        cache.put(&addr, record(&addr, &clock, "X")).await;

        cache.invalidate(&addr).await;
        assert!(cache.get(&addr).await.is_none());
        cache.invalidate(&addr).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let (cache, clock) = cache_with(60);
        let addr = ip("8.8.8.8");
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            let clock = clock.clone();
            async move {
                cache
                    .get_or_compute(&addr, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(record(&addr, &clock, "Mountain View"))
                    })
                    .await
            }
        });

        let results = futures_util::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().city.as_deref() == Some("Mountain View")));
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.get(&addr).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_but_not_cached() {
        let (cache, clock) = cache_with(60);
        let addr = ip("8.8.8.8");
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..3).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_compute(&addr, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(GeoLocationError::api_error("invalid query"))
                    })
                    .await
            }
        });
        let results = futures_util::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.is_err()));
        assert!(cache.get(&addr).await.is_none());
        assert_eq!(cache.in_flight(), 0);

        // 失败之后的调用会重新计算
        let again = cache
            .get_or_compute(&addr, {
                let clock = clock.clone();
                move || async move { Ok(record(&addr, &clock, "Retry")) }
            })
            .await
            .unwrap();
        assert_eq!(again.city.as_deref(), Some("Retry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_finishes_after_caller_gives_up() {
        let (cache, clock) = cache_with(60);
        let addr = ip("8.8.8.8");

        let timed_out = tokio::time::timeout(
            Duration::from_millis(100),
            cache.get_or_compute(&addr, {
                let clock = clock.clone();
                move || async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(record(&addr, &clock, "Mountain View"))
                }
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(cache.in_flight(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.get(&addr).await.is_some());
    }

    #[tokio::test]
    async fn test_flight_panic_becomes_connection_error() {
        let (cache, _clock) = cache_with(60);
        let addr = ip("8.8.8.8");

        let err = cache
            .get_or_compute(&addr, || async {
                let fail = true;
                if fail {
                    panic!("lookup blew up");
                }
                Err(GeoLocationError::api_error("unused"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GeoLocationError::ConnectionError(_)));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_get_or_compute_uses_fresh_cache() {
        let (cache, clock) = cache_with(60);
        let addr = ip("8.8.8.8");
        cache.put(&addr, record(&addr, &clock, "Cached")).await;

        let got = cache
            .get_or_compute(&addr, || async {
                Err(GeoLocationError::connection_error("should not be called"))
            })
            .await
            .unwrap();
        assert_eq!(got.city.as_deref(), Some("Cached"));
    }
}
