use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::{self, GeoCache};
use crate::config::StaticConfig;
use crate::services::geoip::{
    GeoLocationResolver, LookupClient, RateLimiter, RefreshPolicy, RefreshTask,
};
use crate::system::clock::{Clock, SystemClock};

pub struct StartupContext {
    pub resolver: Arc<GeoLocationResolver>,
    pub refresh: RefreshTask,
    pub clock: Arc<dyn Clock>,
}

/// 按配置组装解析器：缓存后端 → 限流 → 外部 API 客户端
pub async fn prepare_startup(config: &StaticConfig) -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = LookupClient::from_config(&config.api);
    let resolver = Arc::new(build_resolver(config, clock.clone(), client).await?);

    let refresh = RefreshTask::new(
        resolver.clone(),
        RefreshPolicy::from_config(&config.refresh),
        clock.clone(),
    );

    info!(
        "Geolocation resolver ready in {:?} (provider: {}, cache: {}, rate limit: {})",
        start_time.elapsed(),
        config.api.url,
        resolver.cache().backend_name(),
        if config.rate_limit.enabled {
            format!("{}/min", config.rate_limit.max_requests_per_minute)
        } else {
            "disabled".to_string()
        }
    );

    Ok(StartupContext {
        resolver,
        refresh,
        clock,
    })
}

/// 使用给定的客户端组装解析器（测试可注入自定义 transport）
pub async fn build_resolver(
    config: &StaticConfig,
    clock: Arc<dyn Clock>,
    client: LookupClient,
) -> Result<GeoLocationResolver> {
    let store = cache::create_store(&config.cache)
        .await
        .map_err(anyhow::Error::msg)
        .context("Failed to create cache backend")?;

    let cache = GeoCache::new(
        store,
        clock.clone(),
        Duration::from_secs(config.cache.ttl_secs),
        config.cache.key_prefix.clone(),
    );
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, clock.clone()));

    Ok(GeoLocationResolver::new(
        cache,
        limiter,
        Arc::new(client),
        clock,
    ))
}
