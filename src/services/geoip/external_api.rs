//! 外部 GeoIP API 客户端
//!
//! 使用外部 HTTP API 进行 IP 地理位置查询（默认 ip-api.com）
//! - 每次请求独立超时
//! - 仅对连接级失败重试（超时、连接被拒、DNS 等）
//! - provider 明确返回的失败（非 2xx、`status: "fail"`）不重试

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, trace, warn};
use ureq::Agent;

use super::record::RawProviderResponse;
use crate::config::{ApiConfig, RetryStrategy};
use crate::utils::ip::ValidIp;

/// HTTP 响应（状态码 + 原始 body）
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// 连接级失败：请求没有拿到任何 HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// 出站 HTTP 能力，只被 [`LookupClient`] 使用
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;

    /// 获取 transport 名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 基于 ureq 的 transport
///
/// ureq 是同步的，请求放到 spawn_blocking 中执行。
/// 非 2xx 状态码不会被 ureq 当作错误，交给上层分类。
pub struct UreqTransport {
    agent: Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            user_agent: user_agent.to_string(),
        }
    }

    fn get_sync(
        agent: Agent,
        url: String,
        user_agent: String,
    ) -> Result<TransportResponse, TransportError> {
        let resp = agent
            .get(&url)
            .header("User-Agent", &user_agent)
            .header("Accept", "application/json")
            .call()
            .map_err(|e| TransportError(format!("request to \"{}\" failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .read_to_string()
            .map_err(|e| TransportError(format!("reading response from \"{}\" failed: {}", url, e)))?;

        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for UreqTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let user_agent = self.user_agent.clone();

        tokio::task::spawn_blocking(move || Self::get_sync(agent, url, user_agent))
            .await
            .unwrap_or_else(|e| Err(TransportError(format!("GeoIP spawn_blocking failed: {}", e))))
    }

    fn name(&self) -> &'static str {
        "ureq"
    }
}

/// 重试配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次），至少为 1
    pub attempts: u32,
    pub delay: Duration,
    pub strategy: RetryStrategy,
    /// 指数退避的上限
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            strategy: RetryStrategy::Fixed,
            max_delay: delay,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
            strategy: config.retry_strategy,
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// 第 `failed_attempts` 次失败之后的等待时间
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.delay,
            RetryStrategy::Exponential => Duration::from_millis(calculate_backoff(
                failed_attempts,
                self.delay.as_millis() as u64,
                self.max_delay.as_millis() as u64,
            )),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(1000))
    }
}

/// 计算指数退避延迟（带抖动）
fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exp_delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp_delay.min(max_ms);
    // 添加 0-25% 的随机抖动，避免惊群效应
    let jitter = rand::random_range(0..=capped / 4);
    capped.saturating_add(jitter)
}

/// 外部查询失败分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// provider 有响应，但表示失败（非 2xx 或失败 payload）
    ApiError(String),
    /// 重试耗尽后仍然连不上 / 超时
    ConnectionError(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::ApiError(msg) => write!(f, "API error: {}", msg),
            LookupError::ConnectionError(msg) => {
                write!(f, "Unable to connect to geolocation service: {}", msg)
            }
        }
    }
}

impl std::error::Error for LookupError {}

/// 外部 API 查询客户端
pub struct LookupClient {
    transport: Arc<dyn HttpTransport>,
    url_template: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl LookupClient {
    /// 创建客户端
    ///
    /// `url_template` 使用 `{ip}` 作为占位符，
    /// 不含占位符时把 IP 拼接到末尾（`http://ip-api.com/json/` + ip）
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url_template: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            url_template: url_template.to_string(),
            timeout,
            retry,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let transport = Arc::new(UreqTransport::new(timeout, &config.user_agent));
        debug!(
            "GeoIP lookup client: url={}, timeout={:?}, attempts={}",
            config.url, timeout, config.retry_attempts
        );
        Self::new(
            transport,
            &config.url,
            timeout,
            RetryPolicy::from_config(config),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn build_url(&self, ip: &ValidIp) -> String {
        let ip = ip.as_key();
        if self.url_template.contains("{ip}") {
            self.url_template.replace("{ip}", &ip)
        } else if self.url_template.ends_with('/') {
            format!("{}{}", self.url_template, ip)
        } else {
            format!("{}/{}", self.url_template, ip)
        }
    }

    /// 查询 provider，返回原始 payload
    pub async fn fetch(&self, ip: &ValidIp) -> Result<RawProviderResponse, LookupError> {
        let url = self.build_url(ip);
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            trace!(
                "GeoIP API request via {}: {} (attempt {}/{})",
                self.transport.name(),
                url,
                attempt,
                attempts
            );

            let failure = match tokio::time::timeout(self.timeout, self.transport.get(&url)).await
            {
                Ok(Ok(response)) => {
                    if attempt > 1 {
                        debug!("GeoIP API request to {} succeeded after {} attempts", url, attempt);
                    }
                    return classify_response(response);
                }
                Ok(Err(e)) => e.0,
                Err(_elapsed) => format!("request timed out after {}ms", self.timeout.as_millis()),
            };

            if attempt >= attempts {
                warn!(
                    "GeoIP API request to {} failed, retries exhausted ({} attempts): {}",
                    url, attempts, failure
                );
                return Err(LookupError::ConnectionError(failure));
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "GeoIP API request to {} failed (attempt {}/{}): {}; retrying in {} ms",
                url,
                attempt,
                attempts,
                failure,
                delay.as_millis()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// 把 HTTP 响应分类为成功 payload 或 ApiError
fn classify_response(response: TransportResponse) -> Result<RawProviderResponse, LookupError> {
    if !(200..300).contains(&response.status) {
        return Err(LookupError::ApiError(format!(
            "API request failed with status: {}",
            response.status
        )));
    }

    let json: Value = serde_json::from_str(&response.body)
        .map_err(|e| LookupError::ApiError(format!("invalid JSON response: {}", e)))?;

    let Value::Object(payload) = json else {
        return Err(LookupError::ApiError(
            "unexpected response payload, expected a JSON object".to_string(),
        ));
    };

    if let Some(message) = provider_failure(&payload) {
        trace!("External API returned fail status: {}", message);
        return Err(LookupError::ApiError(message));
    }

    if payload.is_empty() {
        return Err(LookupError::ApiError("empty response payload".to_string()));
    }

    Ok(payload)
}

/// 识别 provider 的失败 payload，返回 provider 给出的消息
///
/// ip-api.com 失败时返回: {"status": "fail", "message": "..."}
/// 也支持 {"error": true, "reason": "..."} 与 {"success": false, "message": "..."}
fn provider_failure(payload: &RawProviderResponse) -> Option<String> {
    let status_fail = payload
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("fail"));
    let error_flag = payload.get("error").and_then(Value::as_bool) == Some(true);
    let success_false = payload.get("success").and_then(Value::as_bool) == Some(false);

    if !(status_fail || error_flag || success_false) {
        return None;
    }

    let message = ["message", "reason"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or("API request failed");

    Some(message.to_string())
}
