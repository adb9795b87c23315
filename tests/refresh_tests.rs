mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use common::{SCENARIO_OK, INVALID_QUERY, ScriptedTransport, Step, TokioClock, resolver_with_clock};
use geolocator::GeoLocationError;
use geolocator::services::geoip::{GeoLocationRecord, RefreshPolicy, RefreshTask};
use geolocator::system::clock::{Clock, ManualClock};
use geolocator::utils::ip::validate;

fn policy(backoff_secs: &[u64]) -> RefreshPolicy {
    RefreshPolicy {
        tries: 3,
        backoff: backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        outdated_after: TimeDelta::days(30),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_with_backoff() {
    let clock = TokioClock::new();
    // 第一次 resolve 的三次连接尝试全部失败，第二次成功
    let transport = ScriptedTransport::new(
        vec![
            Step::fail("connection refused"),
            Step::fail("connection refused"),
            Step::fail("connection refused"),
        ],
        Step::ok(SCENARIO_OK),
    );
    let resolver = resolver_with_clock(transport.clone(), clock.clone(), |_| {}).await;
    let task = RefreshTask::new(resolver, RefreshPolicy::default(), clock);
    let started = tokio::time::Instant::now();

    let record = task.run("8.8.8.8", true).await.unwrap();

    assert_eq!(record.city.as_deref(), Some("Mountain View"));
    assert_eq!(transport.calls(), 4);
    // 两次 1s 的连接重试 + 60s 的任务退避
    assert!(started.elapsed() >= Duration::from_secs(62));
    assert!(started.elapsed() < Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_returns_immediately() {
    let clock = TokioClock::new();
    let transport = ScriptedTransport::always(INVALID_QUERY);
    let resolver = resolver_with_clock(transport.clone(), clock.clone(), |_| {}).await;
    let task = RefreshTask::new(resolver, policy(&[60, 300, 900]), clock);
    let started = tokio::time::Instant::now();

    let err = task.run("8.8.8.8", true).await.unwrap_err();

    assert_eq!(err, GeoLocationError::api_error("invalid query"));
    assert_eq!(transport.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_ip_is_not_retried() {
    let clock = TokioClock::new();
    let transport = ScriptedTransport::always(SCENARIO_OK);
    let resolver = resolver_with_clock(transport.clone(), clock.clone(), |_| {}).await;
    let task = RefreshTask::new(resolver, policy(&[60]), clock);

    let err = task.run("127.0.0.1", true).await.unwrap_err();

    assert!(matches!(err, GeoLocationError::InvalidIpAddress(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_configured_tries() {
    let clock = TokioClock::new();
    let transport = ScriptedTransport::new(Vec::new(), Step::fail("connection refused"));
    let resolver = resolver_with_clock(transport.clone(), clock.clone(), |c| {
        c.api.retry_attempts = 2;
    })
    .await;
    let task = RefreshTask::new(resolver, policy(&[5, 10]), clock);

    let err = task.run("8.8.8.8", true).await.unwrap_err();

    assert!(matches!(err, GeoLocationError::ConnectionError(_)));
    // 3 次任务尝试 × 2 次连接尝试
    assert_eq!(transport.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_refresh_waits_for_window_reset() {
    let clock = TokioClock::new();
    let transport = ScriptedTransport::always(SCENARIO_OK);
    let resolver = resolver_with_clock(transport.clone(), clock.clone(), |c| {
        c.rate_limit.max_requests_per_minute = 1;
    })
    .await;

    // 用掉本窗口唯一的额度
    resolver.resolve("1.1.1.1", false).await.unwrap();

    let task = RefreshTask::new(resolver, policy(&[5]), clock);
    let started = tokio::time::Instant::now();

    let record = task.run("8.8.8.8", true).await.unwrap();

    assert_eq!(record.ip, "8.8.8.8");
    assert_eq!(transport.calls(), 2);
    // 等待的是窗口剩余时间（60s），而不是 5s 的退避
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test]
async fn test_needs_refresh_uses_outdated_threshold() {
    let manual = Arc::new(ManualClock::default());
    let clock: Arc<dyn Clock> = manual.clone();
    let transport = ScriptedTransport::always(SCENARIO_OK);
    let resolver = resolver_with_clock(transport, clock.clone(), |_| {}).await;
    let task = RefreshTask::new(resolver, policy(&[60]), clock);

    let ip = validate("8.8.8.8").unwrap();
    let record = GeoLocationRecord::from_provider(&ip, serde_json::Map::new(), manual.now());

    assert!(!task.needs_refresh(&record));
    manual.advance(TimeDelta::days(30));
    assert!(!task.needs_refresh(&record));
    manual.advance(TimeDelta::seconds(1));
    assert!(task.needs_refresh(&record));
}
