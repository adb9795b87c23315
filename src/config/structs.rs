use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

/// 外部 API 重试间隔策略
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryStrategy {
    /// 每次等待相同时间
    #[default]
    Fixed,
    /// 指数退避 + 抖动，上限为 `retry_max_delay_ms`
    Exponential,
}

/// 缓存后端类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
    Redis,
    Null,
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::str::FromStr for CacheType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|t| t.as_ref().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let valid: Vec<String> = Self::iter().map(|t| t.as_ref().to_string()).collect();
                format!("Invalid cache type: '{}'. Valid: {}", s, valid.join(", "))
            })
    }
}

/// 静态配置（从 TOML 加载，启动时使用）
///
/// - api: 外部地理位置 API
/// - cache: 缓存后端与 TTL
/// - rate_limit: 外部调用限流
/// - refresh: 管理员刷新任务
/// - logging: 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StaticConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从 "config.toml" 和环境变量加载
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config.toml")
    }

    /// 从指定 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > 配置文件 > 默认值
    /// ENV 前缀：GEO，分隔符：__
    /// 示例：GEO__API__TIMEOUT_SECS=5
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖
            .add_source(
                Environment::with_prefix("GEO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize::<StaticConfig>()
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.api.url.replace("{ip}", "8.8.8.8"))
            .map_err(|e| format!("Invalid api.url '{}': {}", self.api.url, e))?;

        if self.api.timeout_secs == 0 {
            return Err("api.timeout_secs must be greater than 0".to_string());
        }
        if self.api.retry_attempts == 0 {
            return Err("api.retry_attempts must be at least 1".to_string());
        }
        if self.rate_limit.enabled && self.rate_limit.max_requests_per_minute == 0 {
            return Err(
                "rate_limit.max_requests_per_minute must be greater than 0 when enabled"
                    .to_string(),
            );
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(format!(
                "Invalid logging.format: '{}'. Valid: text, json",
                self.logging.format
            ));
        }
        Ok(())
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 外部 API 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// 使用 {ip} 作为占位符；不含占位符时 IP 拼接在末尾
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// 总尝试次数（含第一次）
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    #[serde(default)]
    pub cache_type: CacheType,
    /// 0 表示不缓存
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub redis: RedisConfig,
}

/// 内存缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_capacity")]
    pub max_capacity: u64,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// 外部调用限流配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

/// 刷新任务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_tries")]
    pub tries: u32,
    #[serde(default = "default_refresh_backoff")]
    pub backoff_secs: Vec<u64>,
    #[serde(default = "default_outdated_after_days")]
    pub outdated_after_days: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" 或 "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_true")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions
// ============================================================

fn default_api_url() -> String {
    "http://ip-api.com/json/{ip}".to_string()
}

fn default_api_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    format!("geolocator/{}", env!("CARGO_PKG_VERSION"))
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "geo:ip:".to_string()
}

fn default_memory_capacity() -> u64 {
    10000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_requests_per_minute() -> u32 {
    45
}

fn default_refresh_tries() -> u32 {
    3
}

fn default_refresh_backoff() -> Vec<u64> {
    vec![60, 300, 900]
}

fn default_outdated_after_days() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_api_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_strategy: RetryStrategy::default(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            ttl_secs: default_cache_ttl(),
            key_prefix: default_key_prefix(),
            memory: MemoryConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_memory_capacity(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_minute: default_max_requests_per_minute(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tries: default_refresh_tries(),
            backoff_secs: default_refresh_backoff(),
            outdated_after_days: default_outdated_after_days(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StaticConfig::default();
        assert_eq!(config.api.url, "http://ip-api.com/json/{ip}");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.api.retry_attempts, 3);
        assert_eq!(config.api.retry_delay_ms, 1000);
        assert_eq!(config.api.retry_strategy, RetryStrategy::Fixed);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.key_prefix, "geo:ip:");
        assert_eq!(config.cache.cache_type, CacheType::Memory);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests_per_minute, 45);
        assert_eq!(config.refresh.backoff_secs, vec![60, 300, 900]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_type_from_str() {
        assert_eq!("Redis".parse::<CacheType>(), Ok(CacheType::Redis));
        assert_eq!("null".parse::<CacheType>(), Ok(CacheType::Null));
        let err = "disk".parse::<CacheType>().unwrap_err();
        assert!(err.contains("memory, redis, null"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StaticConfig::default();
        config.api.url = "not a url".to_string();
        assert!(config.validate().unwrap_err().contains("api.url"));

        let mut config = StaticConfig::default();
        config.api.retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = StaticConfig::default();
        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = StaticConfig::default();
        config.rate_limit.max_requests_per_minute = 0;
        assert!(config.validate().is_err());
        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = StaticConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_parses_back() {
        let sample = StaticConfig::generate_sample_config();
        assert!(sample.contains("[api]"));
        assert!(sample.contains("type = \"memory\""));

        let parsed: StaticConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed, StaticConfig::default());
    }
}
