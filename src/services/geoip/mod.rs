//! IP 地理位置解析
//!
//! - `external_api`：外部 HTTP API 查询（默认 ip-api.com），带超时与重试
//! - `rate_limit`：外部调用的每分钟限流
//! - `record`：provider 响应归一化
//! - `resolver`：校验 → 缓存 → 限流 → 查询 → 写缓存
//! - `refresh`：按退避表重试的管理员刷新

pub mod external_api;
pub mod rate_limit;
pub mod record;
pub mod refresh;
pub mod resolver;

pub use external_api::{
    HttpTransport, LookupClient, LookupError, RetryPolicy, TransportError, TransportResponse,
    UreqTransport,
};
pub use rate_limit::{RateLimitError, RateLimitWindow, RateLimiter};
pub use record::{GeoLocationRecord, RawProviderResponse};
pub use refresh::{RefreshPolicy, RefreshTask};
pub use resolver::{GeoLocationResolver, ResolveStage, ResolverStats, ResolverStatsSnapshot};
