//! 外部 API 调用限流
//!
//! 固定一分钟窗口计数：窗口从第一次预留开始计时，60 秒后整体重置。
//! 检查与自增在同一把锁内完成，并发调用不会超发。
//! 超限直接返回错误，不阻塞等待。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::system::clock::Clock;

/// 窗口长度
pub const WINDOW: TimeDelta = TimeDelta::seconds(60);

/// 当前窗口状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub started_at: DateTime<Utc>,
    pub count: u32,
}

impl RateLimitWindow {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            count: 0,
        }
    }

    fn is_active(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at < WINDOW
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    Exceeded { limit: u32, retry_after: Duration },
}

impl RateLimitError {
    /// 距离窗口重置的剩余时间
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitError::Exceeded { retry_after, .. } => *retry_after,
        }
    }
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::Exceeded { limit, retry_after } => write!(
                f,
                "Rate limit exceeded ({} requests per minute). Please try again in {}s.",
                limit,
                retry_after.as_secs().max(1)
            ),
        }
    }
}

impl std::error::Error for RateLimitError {}

pub struct RateLimiter {
    enabled: bool,
    max_per_minute: u32,
    clock: Arc<dyn Clock>,
    window: Mutex<Option<RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: true,
            max_per_minute,
            clock,
            window: Mutex::new(None),
        }
    }

    /// 不做任何限制
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: false,
            ..Self::new(u32::MAX, clock)
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        if config.enabled {
            Self::new(config.max_requests_per_minute, clock)
        } else {
            debug!("Geolocation rate limiting disabled");
            Self::disabled(clock)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_per_minute(&self) -> u32 {
        self.max_per_minute
    }

    /// 为一次外部调用预留额度
    pub fn check_and_reserve(&self) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let mut guard = self.window.lock();

        let mut window = match *guard {
            Some(w) if w.is_active(now) => w,
            Some(_) => {
                debug!("Rate limit window expired, starting a new one");
                RateLimitWindow::fresh(now)
            }
            None => RateLimitWindow::fresh(now),
        };

        if window.count >= self.max_per_minute {
            *guard = Some(window);
            let retry_after = (window.started_at + WINDOW - now)
                .to_std()
                .unwrap_or_default();
            warn!(
                "Geolocation rate limit reached: {}/{} in current window, retry after {:?}",
                window.count, self.max_per_minute, retry_after
            );
            return Err(RateLimitError::Exceeded {
                limit: self.max_per_minute,
                retry_after,
            });
        }

        window.count += 1;
        *guard = Some(window);
        Ok(())
    }

    /// 当前仍有效的窗口（已过期视为没有）
    pub fn current_window(&self) -> Option<RateLimitWindow> {
        let now = self.clock.now();
        let window = *self.window.lock();
        window.filter(|w| w.is_active(now))
    }

    /// 额度用尽时距离窗口重置的时间，否则为 0
    pub fn retry_after(&self) -> Duration {
        if self.remaining() > 0 {
            return Duration::ZERO;
        }
        let now = self.clock.now();
        self.current_window()
            .and_then(|w| (w.started_at + WINDOW - now).to_std().ok())
            .unwrap_or_default()
    }

    /// 当前窗口剩余额度
    pub fn remaining(&self) -> u32 {
        if !self.enabled {
            return u32::MAX;
        }
        let used = self.current_window().map_or(0, |w| w.count);
        self.max_per_minute.saturating_sub(used)
    }
}
