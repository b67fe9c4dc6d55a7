//! Config file loading and environment resolution.
use std::fs;
use std::sync::Mutex;

use nexus_telemetry::config::{config_path, TelemetryConfig};
use nexus_telemetry::EngineError;

// Serializes tests that mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn missing_file_yields_defaults() {
    let td = tempfile::tempdir().unwrap();
    let cfg = TelemetryConfig::load_from(&td.path().join("nope.json")).unwrap();
    assert_eq!(cfg, TelemetryConfig::default());
}

#[test]
fn save_then_load_round_trips() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("nested").join("telemetry.json");
    let cfg = TelemetryConfig {
        interval_ms: 500,
        interface: Some("eth1".into()),
        seed: Some(9),
        ..TelemetryConfig::default()
    };
    cfg.save(&path).unwrap();
    assert_eq!(TelemetryConfig::load_from(&path).unwrap(), cfg);
}

#[test]
fn malformed_file_is_a_config_error() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("telemetry.json");
    fs::write(&path, "{ interval_ms: fast }").unwrap();
    match TelemetryConfig::load_from(&path) {
        Err(EngineError::Config { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn load_reads_xdg_dir_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    let td = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_CONFIG_HOME", td.path());
    std::env::set_var("NEXUS_TELEMETRY_VOLUME", "/data");
    assert_eq!(config_path(), td.path().join("nexus").join("telemetry.json"));

    fs::create_dir_all(td.path().join("nexus")).unwrap();
    fs::write(
        config_path(),
        r#"{ "interval_ms": 2000, "top_k": 3, "disk_volume": "/home" }"#,
    )
    .unwrap();

    let cfg = TelemetryConfig::load().unwrap();
    assert_eq!(cfg.interval_ms, 2000);
    assert_eq!(cfg.top_k, 3);
    assert_eq!(cfg.disk_volume, "/data");

    std::env::remove_var("NEXUS_TELEMETRY_VOLUME");
    std::env::remove_var("XDG_CONFIG_HOME");
}
