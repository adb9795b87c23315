use std::fmt;

use crate::services::geoip::{LookupError, RateLimitError};
use crate::utils::ip::InvalidIpError;

/// 地理位置解析错误
///
/// 从检测点原样传递到 `resolve` 调用方；`Clone` 是为了
/// singleflight 路径把同一个错误交给所有等待者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoLocationError {
    InvalidIpAddress(String),
    RateLimitExceeded(String),
    ConnectionError(String),
    ApiError(String),
}

impl GeoLocationError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            GeoLocationError::InvalidIpAddress(_) => "G001",
            GeoLocationError::RateLimitExceeded(_) => "G002",
            GeoLocationError::ConnectionError(_) => "G003",
            GeoLocationError::ApiError(_) => "G004",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            GeoLocationError::InvalidIpAddress(_) => "Invalid IP Address",
            GeoLocationError::RateLimitExceeded(_) => "Rate Limit Exceeded",
            GeoLocationError::ConnectionError(_) => "Connection Error",
            GeoLocationError::ApiError(_) => "API Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            GeoLocationError::InvalidIpAddress(msg) => msg,
            GeoLocationError::RateLimitExceeded(msg) => msg,
            GeoLocationError::ConnectionError(msg) => msg,
            GeoLocationError::ApiError(msg) => msg,
        }
    }

    /// 对应的 HTTP 状态码（供上层 REST 层映射）
    pub fn http_status(&self) -> u16 {
        match self {
            GeoLocationError::InvalidIpAddress(_) => 400,
            GeoLocationError::RateLimitExceeded(_) => 429,
            GeoLocationError::ConnectionError(_) => 503,
            GeoLocationError::ApiError(_) => 502,
        }
    }

    /// 稍后重试可能成功的错误
    ///
    /// resolver 自身从不重试，这个判断只给调用方（例如 RefreshTask）使用。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GeoLocationError::RateLimitExceeded(_) | GeoLocationError::ConnectionError(_)
        )
    }

    /// 格式化为彩色输出
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for GeoLocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for GeoLocationError {}

// 便捷的构造函数
impl GeoLocationError {
    pub fn invalid_ip_address<T: Into<String>>(msg: T) -> Self {
        GeoLocationError::InvalidIpAddress(msg.into())
    }

    pub fn rate_limit_exceeded<T: Into<String>>(msg: T) -> Self {
        GeoLocationError::RateLimitExceeded(msg.into())
    }

    pub fn connection_error<T: Into<String>>(msg: T) -> Self {
        GeoLocationError::ConnectionError(msg.into())
    }

    pub fn api_error<T: Into<String>>(msg: T) -> Self {
        GeoLocationError::ApiError(msg.into())
    }
}

impl From<InvalidIpError> for GeoLocationError {
    fn from(err: InvalidIpError) -> Self {
        GeoLocationError::InvalidIpAddress(err.to_string())
    }
}

impl From<RateLimitError> for GeoLocationError {
    fn from(err: RateLimitError) -> Self {
        GeoLocationError::RateLimitExceeded(err.to_string())
    }
}

impl From<LookupError> for GeoLocationError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::ApiError(msg) => GeoLocationError::ApiError(msg),
            LookupError::ConnectionError(msg) => GeoLocationError::ConnectionError(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, GeoLocationError>;
