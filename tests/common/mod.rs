//! 集成测试共用：脚本化 transport 与解析器装配

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use geolocator::config::StaticConfig;
use geolocator::runtime::lifetime::startup::build_resolver;
use geolocator::services::geoip::{
    GeoLocationResolver, HttpTransport, LookupClient, RetryPolicy, TransportError,
    TransportResponse,
};
use geolocator::system::clock::{Clock, ManualClock};

pub const GOOGLE_DNS: &str = r#"{"status":"success","country":"United States","countryCode":"US","region":"CA","regionName":"California","city":"Mountain View","zip":"94043","lat":37.4,"lon":-122.1,"timezone":"America/Los_Angeles","isp":"Google LLC","org":"Google Public DNS","as":"AS15169 Google LLC","query":"8.8.8.8"}"#;

pub const SCENARIO_OK: &str =
    r#"{"status":"ok","country":"United States","city":"Mountain View","lat":37.4,"lon":-122.1}"#;

pub const INVALID_QUERY: &str = r#"{"status":"fail","message":"invalid query"}"#;

#[derive(Clone)]
pub enum Step {
    Respond(u16, String),
    Fail(String),
}

impl Step {
    pub fn ok(body: &str) -> Self {
        Step::Respond(200, body.to_string())
    }

    pub fn fail(msg: &str) -> Self {
        Step::Fail(msg.to_string())
    }
}

/// 按脚本返回响应；脚本用完后重复 `fallback`
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Self::with_latency(steps, fallback, Duration::ZERO)
    }

    /// 每次请求先等待 `latency`（配合 `start_paused` 使用）
    pub fn with_latency(steps: Vec<Step>, fallback: Step, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback,
            latency,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// 永远返回同一个 body
    pub fn always(body: &str) -> Arc<Self> {
        Self::new(Vec::new(), Step::ok(body))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Respond(status, body) => Ok(TransportResponse { status, body }),
            Step::Fail(msg) => Err(TransportError(msg)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct Harness {
    pub resolver: Arc<GeoLocationResolver>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub config: StaticConfig,
}

impl Harness {
    pub async fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_config(transport, |_| {}).await
    }

    pub async fn with_config(
        transport: Arc<ScriptedTransport>,
        customize: impl FnOnce(&mut StaticConfig),
    ) -> Self {
        let mut config = StaticConfig::default();
        customize(&mut config);

        let clock = Arc::new(ManualClock::default());
        let client = LookupClient::new(
            transport.clone(),
            &config.api.url,
            Duration::from_secs(config.api.timeout_secs),
            RetryPolicy::from_config(&config.api),
        );
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let resolver = build_resolver(&config, dyn_clock, client)
            .await
            .expect("resolver wiring");

        Self {
            resolver: Arc::new(resolver),
            transport,
            clock,
            config,
        }
    }
}

/// 跟随 tokio（可暂停）时间前进的时钟
pub struct TokioClock {
    base: chrono::DateTime<chrono::Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: chrono::Utc::now(),
            started: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        let elapsed = chrono::TimeDelta::from_std(self.started.elapsed()).unwrap_or_default();
        self.base + elapsed
    }
}

/// 使用指定时钟装配解析器
pub async fn resolver_with_clock(
    transport: Arc<ScriptedTransport>,
    clock: Arc<dyn Clock>,
    customize: impl FnOnce(&mut StaticConfig),
) -> Arc<GeoLocationResolver> {
    let mut config = StaticConfig::default();
    customize(&mut config);
    let client = LookupClient::new(
        transport,
        &config.api.url,
        Duration::from_secs(config.api.timeout_secs),
        RetryPolicy::from_config(&config.api),
    );
    Arc::new(
        build_resolver(&config, clock, client)
            .await
            .expect("resolver wiring"),
    )
}
