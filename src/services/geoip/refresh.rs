//! 管理员刷新任务
//!
//! 重新解析已保存的 IP（默认强制刷新）。只有暂时性错误
//! （连接失败、限流）会按退避表重试；非法 IP、provider 明确拒绝直接返回。

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::record::GeoLocationRecord;
use super::resolver::GeoLocationResolver;
use crate::config::RefreshConfig;
use crate::errors::GeoLocationError;
use crate::system::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// 总尝试次数（至少 1）
    pub tries: u32,
    /// 第 n 次失败后的等待时间，超出部分沿用最后一项
    pub backoff: Vec<Duration>,
    /// 记录超过该时长视为过期
    pub outdated_after: TimeDelta,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            backoff: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ],
            outdated_after: TimeDelta::days(30),
        }
    }
}

impl RefreshPolicy {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            tries: config.tries.max(1),
            backoff: config
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            outdated_after: TimeDelta::days(i64::from(config.outdated_after_days)),
        }
    }

    /// 第 `failed_attempts` 次失败后的等待时间
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let idx = (failed_attempts.max(1) - 1) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

pub struct RefreshTask {
    resolver: Arc<GeoLocationResolver>,
    policy: RefreshPolicy,
    clock: Arc<dyn Clock>,
}

impl RefreshTask {
    pub fn new(
        resolver: Arc<GeoLocationResolver>,
        policy: RefreshPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// 记录是否已经过期，需要刷新
    pub fn needs_refresh(&self, record: &GeoLocationRecord) -> bool {
        record.is_outdated(self.policy.outdated_after, self.clock.now())
    }

    /// 执行刷新
    pub async fn run(
        &self,
        ip: &str,
        force_refresh: bool,
    ) -> Result<GeoLocationRecord, GeoLocationError> {
        let tries = self.policy.tries.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.resolver.resolve(ip, force_refresh).await {
                Ok(record) => {
                    info!(
                        "Geolocation refreshed for {}: {} (attempt {}/{})",
                        ip,
                        record.formatted_location(),
                        attempt,
                        tries
                    );
                    return Ok(record);
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                error!("Geolocation refresh for {} failed permanently: {}", ip, err);
                return Err(err);
            }

            if attempt >= tries {
                error!(
                    "Geolocation refresh for {} failed after {} attempts: {}",
                    ip, tries, err
                );
                return Err(err);
            }

            let mut delay = self.policy.delay_for(attempt);
            if matches!(err, GeoLocationError::RateLimitExceeded(_)) {
                delay = delay.max(self.resolver.limiter().retry_after());
            }

            warn!(
                "Geolocation refresh for {} failed (attempt {}/{}): {}; retrying in {}s",
                ip,
                attempt,
                tries,
                err,
                delay.as_secs()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
