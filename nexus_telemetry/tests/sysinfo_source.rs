//! Smoke tests against the live host through sysinfo.
use nexus_telemetry::{CounterSource, SysinfoSource};

#[test]
fn memory_and_cpu_are_percentages() {
    let src = SysinfoSource::new();
    let mem = src.read_mem_percent().unwrap();
    assert!((0.0..=100.0).contains(&mem), "mem {mem}");
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    let cpu = src.read_cpu_percent().unwrap();
    assert!((0.0..=100.0).contains(&cpu), "cpu {cpu}");
}

#[test]
fn process_list_includes_this_test() {
    let procs = SysinfoSource::new().list_processes_by_memory().unwrap();
    assert!(!procs.is_empty());
    assert!(procs.iter().any(|p| p.resident_bytes > 0));
}

#[cfg(target_os = "linux")]
#[test]
fn connections_never_include_listeners() {
    use nexus_telemetry::types::TcpState;
    let conns = SysinfoSource::new().list_connections().unwrap();
    assert!(conns.iter().all(|c| c.state != TcpState::Listen));
}
