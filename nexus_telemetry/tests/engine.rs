//! Session lifecycle tests against a scripted counter source.
use std::sync::Arc;
use std::time::Duration;

use nexus_telemetry::{
    CounterSource, EngineError, Metric, RateBasis, ScriptedSource, SessionState, TelemetryConfig,
    TelemetryEngine,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{sleep, timeout};

fn fast_config() -> TelemetryConfig {
    TelemetryConfig {
        interval_ms: 40,
        read_timeout_ms: 30,
        ..TelemetryConfig::default()
    }
}

fn engine_with(src: Arc<ScriptedSource>) -> TelemetryEngine {
    let src: Arc<dyn CounterSource> = src;
    TelemetryEngine::new(fast_config(), src).with_rng(StdRng::seed_from_u64(11))
}

#[tokio::test]
async fn snapshots_arrive_in_tick_order() {
    let src = Arc::new(ScriptedSource::demo());
    let mut engine = engine_with(src);
    let mut sub = engine.subscribe();
    engine.start().unwrap();
    assert_eq!(engine.state(), SessionState::Sampling);

    let mut last: Option<u64> = None;
    for _ in 0..5 {
        let snap = timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("snapshot within 2s")
            .expect("engine alive");
        if let Some(prev) = last {
            assert!(snap.tick > prev, "tick {} after {}", snap.tick, prev);
        }
        last = Some(snap.tick);
        assert_eq!(snap.session, 1);
    }
    engine.stop().await;
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn nothing_is_published_after_stop() {
    let src = Arc::new(ScriptedSource::demo());
    let mut engine = engine_with(src);
    let mut sub = engine.subscribe();
    engine.start().unwrap();
    timeout(Duration::from_secs(2), sub.next()).await.unwrap();

    engine.stop().await;
    assert!(sub.latest().is_none());
    sub.mark_seen();
    sleep(Duration::from_millis(200)).await;
    assert!(!sub.has_pending());
}

#[tokio::test]
async fn stop_during_a_pending_read_publishes_nothing() {
    let src = Arc::new(ScriptedSource::demo());
    // longer than the interval, shorter than the read timeout
    src.stall(Metric::Processes, Duration::from_millis(300));
    let src_dyn: Arc<dyn CounterSource> = src.clone();
    let cfg = TelemetryConfig {
        interval_ms: 40,
        read_timeout_ms: 2_000,
        ..TelemetryConfig::default()
    };
    let mut engine = TelemetryEngine::new(cfg, src_dyn).with_rng(StdRng::seed_from_u64(11));
    let mut sub = engine.subscribe();
    engine.start().unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(src.reads(Metric::Processes), 1);
    assert!(sub.latest().is_none(), "first tick is still waiting on its read");

    let started = std::time::Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(engine.state(), SessionState::Idle);
    assert!(sub.latest().is_none());
    sub.mark_seen();

    // the abandoned read returns after this point
    sleep(Duration::from_millis(400)).await;
    assert!(!sub.has_pending());
    assert!(sub.latest().is_none());
}

#[tokio::test]
async fn restart_starts_cold() {
    let src = Arc::new(ScriptedSource::demo().with_net_step(4096));
    let mut engine = engine_with(src.clone());
    let mut sub = engine.subscribe();

    engine.start().unwrap();
    let mut warm = None;
    while let Ok(Some(s)) = timeout(Duration::from_secs(2), sub.next()).await {
        if s.tick >= 3 {
            warm = Some(s);
            break;
        }
    }
    let warm = warm.expect("session warmed up");
    assert_eq!(warm.rates.basis, RateBasis::Measured);
    assert!(warm.rates.download_kbps > 0.0);
    engine.stop().await;

    engine.start().unwrap();
    let cold = timeout(Duration::from_secs(2), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cold.session, 2);
    assert_eq!(cold.tick, 0);
    assert_eq!(cold.rates.download_kbps, 0.0);
    assert_eq!(cold.rates.basis, RateBasis::NoBaseline);
    // one point plus the two closing points
    assert_eq!(cold.history.len(), 3);
    assert!(cold.events.len() <= 1);
    engine.stop().await;
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let mut engine = engine_with(Arc::new(ScriptedSource::demo()));
    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadySampling)));
    engine.stop().await;
    engine.start().unwrap();
    engine.stop().await;
}

#[test]
fn start_outside_runtime_fails_cleanly() {
    let mut engine = engine_with(Arc::new(ScriptedSource::demo()));
    assert!(matches!(engine.start(), Err(EngineError::NoRuntime)));
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let mut engine = engine_with(Arc::new(ScriptedSource::demo()));
    engine.stop().await;
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn failing_metric_does_not_stop_publication() {
    let src = Arc::new(ScriptedSource::demo());
    src.fail(Metric::Disk);
    src.stall(Metric::Processes, Duration::from_millis(300));
    let mut engine = engine_with(src);
    let mut sub = engine.subscribe();
    engine.start().unwrap();

    let snap = timeout(Duration::from_secs(2), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert!(snap.unavailable.contains(&Metric::Disk));
    assert!(snap.unavailable.contains(&Metric::Processes));
    assert!(snap.disk.is_none());
    assert_eq!(snap.cpu_percent, Some(23.5));
    engine.stop().await;
}

#[tokio::test]
async fn slow_subscriber_only_sees_latest() {
    let src = Arc::new(ScriptedSource::demo());
    let mut engine = engine_with(src);
    let mut sub = engine.subscribe();
    engine.start().unwrap();

    // let several ticks pile up unread
    sleep(Duration::from_millis(300)).await;
    let snap = sub.next().await.unwrap();
    assert!(snap.tick >= 3, "expected a late tick, got {}", snap.tick);
    engine.stop().await;
}
