//! 地理位置解析入口
//!
//! 流程：校验 IP → 查缓存 →（未命中）限流 → 外部查询 → 归一化 → 写缓存。
//! 缓存命中不消耗限流额度，也不访问外部 API。
//! 所有错误原样返回给调用方，解析器自身不再叠加重试。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use serde::Serialize;
use strum::AsRefStr;
use tracing::{debug, error, trace};

use super::external_api::LookupClient;
use super::rate_limit::RateLimiter;
use super::record::GeoLocationRecord;
use crate::cache::GeoCache;
use crate::errors::GeoLocationError;
use crate::system::clock::Clock;
use crate::utils::ip::{self, ValidIp};

/// 解析阶段（用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ResolveStage {
    Validating,
    CacheCheck,
    RateLimiting,
    Fetching,
    Normalizing,
    CacheWrite,
    Resolved,
}

impl ResolveStage {
    /// 错误是在哪个阶段产生的
    pub fn failed_at(err: &GeoLocationError) -> Self {
        match err {
            GeoLocationError::InvalidIpAddress(_) => ResolveStage::Validating,
            GeoLocationError::RateLimitExceeded(_) => ResolveStage::RateLimiting,
            GeoLocationError::ConnectionError(_) | GeoLocationError::ApiError(_) => {
                ResolveStage::Fetching
            }
        }
    }
}

/// 解析统计
#[derive(Debug, Default)]
pub struct ResolverStats {
    cache_hits: AtomicU64,
    flights: AtomicU64,
    outbound_calls: AtomicU64,
    invalid_ip: AtomicU64,
    rate_limited: AtomicU64,
    connection_errors: AtomicU64,
    api_errors: AtomicU64,
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStatsSnapshot {
    pub cache_hits: u64,
    pub flights: u64,
    pub outbound_calls: u64,
    pub invalid_ip: u64,
    pub rate_limited: u64,
    pub connection_errors: u64,
    pub api_errors: u64,
}

impl ResolverStatsSnapshot {
    pub fn failures(&self) -> u64 {
        self.invalid_ip + self.rate_limited + self.connection_errors + self.api_errors
    }
}

impl ResolverStats {
    fn record_failure(&self, err: &GeoLocationError) {
        let counter = match err {
            GeoLocationError::InvalidIpAddress(_) => &self.invalid_ip,
            GeoLocationError::RateLimitExceeded(_) => &self.rate_limited,
            GeoLocationError::ConnectionError(_) => &self.connection_errors,
            GeoLocationError::ApiError(_) => &self.api_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            flights: self.flights.load(Ordering::Relaxed),
            outbound_calls: self.outbound_calls.load(Ordering::Relaxed),
            invalid_ip: self.invalid_ip.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct GeoLocationResolver {
    cache: GeoCache,
    limiter: Arc<RateLimiter>,
    client: Arc<LookupClient>,
    clock: Arc<dyn Clock>,
    stats: Arc<ResolverStats>,
}

impl GeoLocationResolver {
    pub fn new(
        cache: GeoCache,
        limiter: Arc<RateLimiter>,
        client: Arc<LookupClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            limiter,
            client,
            clock,
            stats: Arc::new(ResolverStats::default()),
        }
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    /// 解析 IP 的地理位置
    ///
    /// `force_refresh` 为 true 时先删除缓存，保证发起一次新的外部查询
    /// （若同一 IP 已有查询在进行，则共享它的结果）。
    pub async fn resolve(
        &self,
        ip: &str,
        force_refresh: bool,
    ) -> Result<GeoLocationRecord, GeoLocationError> {
        let result = self.resolve_inner(ip, force_refresh).await;

        if let Err(ref e) = result {
            self.stats.record_failure(e);
            match e {
                GeoLocationError::InvalidIpAddress(_) => {
                    debug!("Rejected geolocation request for '{}': {}", ip, e.message())
                }
                _ => error!(
                    ip = %ip,
                    stage = ResolveStage::failed_at(e).as_ref(),
                    "Geolocation resolution failed: {}",
                    e
                ),
            }
        }

        result
    }

    async fn resolve_inner(
        &self,
        ip: &str,
        force_refresh: bool,
    ) -> Result<GeoLocationRecord, GeoLocationError> {
        trace!(ip = %ip, stage = ResolveStage::Validating.as_ref());
        let valid = ip::validate(ip)?;

        if force_refresh {
            debug!("Forced refresh for {}, invalidating cache entry", valid);
            self.cache.invalidate(&valid).await;
        } else {
            trace!(ip = %valid, stage = ResolveStage::CacheCheck.as_ref());
            if let Some(record) = self.cache.get(&valid).await {
                trace!("Geolocation cache hit: {}", valid);
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(record);
            }
            trace!("Geolocation cache miss: {}", valid);
        }

        let limiter = Arc::clone(&self.limiter);
        let client = Arc::clone(&self.client);
        let clock = Arc::clone(&self.clock);
        let stats = Arc::clone(&self.stats);

        let record = self
            .cache
            .get_or_compute(&valid, move || async move {
                stats.flights.fetch_add(1, Ordering::Relaxed);
                fetch_record(valid, &limiter, &client, clock.as_ref(), &stats).await
            })
            .await?;

        trace!(ip = %valid, stage = ResolveStage::Resolved.as_ref());
        Ok(record)
    }

    /// 并发解析多个 IP，结果顺序与输入一致
    pub async fn resolve_many<S: AsRef<str>>(
        &self,
        ips: &[S],
        force_refresh: bool,
    ) -> Vec<Result<GeoLocationRecord, GeoLocationError>> {
        join_all(ips.iter().map(|ip| self.resolve(ip.as_ref(), force_refresh))).await
    }

    /// 删除 IP 的缓存，下一次解析必定访问外部 API
    pub async fn invalidate(&self, ip: &str) -> Result<(), GeoLocationError> {
        let valid = ip::validate(ip)?;
        self.cache.invalidate(&valid).await;
        debug!("Invalidated geolocation cache for {}", valid);
        Ok(())
    }
}

/// 未命中时的计算：限流 → 查询 → 归一化（写缓存由 `GeoCache` 完成）
async fn fetch_record(
    ip: ValidIp,
    limiter: &RateLimiter,
    client: &LookupClient,
    clock: &dyn Clock,
    stats: &ResolverStats,
) -> Result<GeoLocationRecord, GeoLocationError> {
    trace!(ip = %ip, stage = ResolveStage::RateLimiting.as_ref());
    limiter.check_and_reserve()?;

    trace!(ip = %ip, stage = ResolveStage::Fetching.as_ref());
    stats.outbound_calls.fetch_add(1, Ordering::Relaxed);
    let raw = client.fetch(&ip).await?;

    trace!(ip = %ip, stage = ResolveStage::Normalizing.as_ref());
    let record = GeoLocationRecord::from_provider(&ip, raw, clock.now());

    trace!(ip = %ip, stage = ResolveStage::CacheWrite.as_ref());
    debug!(
        "Resolved {} -> {} (complete: {})",
        ip,
        record.formatted_location(),
        record.is_complete()
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::object_cache::MokaGeoStore;
    use crate::services::geoip::external_api::{
        HttpTransport, RetryPolicy, TransportError, TransportResponse,
    };
    use crate::system::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FixedTransport {
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn get(&self, _url: &str) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(TransportResponse {
                status: 200,
                body: self.body.to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn resolver(body: &'static str) -> (GeoLocationResolver, Arc<FixedTransport>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let transport = Arc::new(FixedTransport {
            body,
            calls: AtomicUsize::new(0),
        });
        let client = LookupClient::new(
            transport.clone(),
            "http://ip-api.com/json/{ip}",
            Duration::from_secs(10),
            RetryPolicy::fixed(3, Duration::from_millis(1000)),
        );
        let cache = GeoCache::new(
            Arc::new(MokaGeoStore::new(100)),
            clock.clone(),
            Duration::from_secs(3600),
            "geo:ip:",
        );
        let resolver = GeoLocationResolver::new(
            cache,
            Arc::new(RateLimiter::new(45, clock.clone())),
            Arc::new(client),
            clock,
        );
        (resolver, transport)
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ResolveStage::CacheCheck.as_ref(), "cache_check");
        assert_eq!(
            ResolveStage::failed_at(&GeoLocationError::api_error("x")),
            ResolveStage::Fetching
        );
        assert_eq!(
            ResolveStage::failed_at(&GeoLocationError::rate_limit_exceeded("x")),
            ResolveStage::RateLimiting
        );
    }

    #[tokio::test]
    async fn test_resolve_then_hit_cache() {
        let (resolver, transport) =
            resolver(r#"{"status":"success","country":"Japan","city":"Tokyo"}"#);

        let first = resolver.resolve("1.1.1.1", false).await.unwrap();
        let second = resolver.resolve("1.1.1.1", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let stats = resolver.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.outbound_calls, 1);
        assert_eq!(stats.flights, 1);
        assert_eq!(stats.failures(), 0);
    }

    #[tokio::test]
    async fn test_invalid_ip_counts_failure_without_calls() {
        let (resolver, transport) = resolver(r#"{"status":"success"}"#);

        let err = resolver.resolve("10.0.0.1", false).await.unwrap_err();
        assert!(matches!(err, GeoLocationError::InvalidIpAddress(_)));
        assert!(resolver.invalidate("not-an-ip").await.is_err());

        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(resolver.stats().invalid_ip, 1);
    }

    #[tokio::test]
    async fn test_resolve_many_preserves_order() {
        let (resolver, _transport) =
            resolver(r#"{"status":"success","country":"Japan","city":"Tokyo"}"#);

        let results = resolver
            .resolve_many(&["8.8.8.8", "127.0.0.1", "1.1.1.1"], false)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().ip, "8.8.8.8");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().ip, "1.1.1.1");
    }
}
