//! Counter sources: point-in-time host readings behind a replaceable trait.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use sysinfo::{Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::CounterError;
use crate::types::{Connection, DiskUsage, Metric, ProcessEntry, TcpState};

/// Blocking reads; each may fail on its own without affecting the others.
pub trait CounterSource: Send + Sync + 'static {
    fn read_cpu_percent(&self) -> Result<f32, CounterError>;
    fn read_mem_percent(&self) -> Result<f32, CounterError>;
    fn read_disk(&self, volume: &str) -> Result<DiskUsage, CounterError>;
    /// Cumulative bytes received; `None` picks a default interface.
    fn read_net_bytes_received(&self, interface: Option<&str>) -> Result<u64, CounterError>;
    fn list_connections(&self) -> Result<Vec<Connection>, CounterError>;
    fn list_processes_by_memory(&self) -> Result<Vec<ProcessEntry>, CounterError>;
}

fn lock<'a, T>(m: &'a Mutex<T>, metric: Metric) -> Result<MutexGuard<'a, T>, CounterError> {
    m.lock().map_err(|_| {
        CounterError::unavailable(metric, "sysinfo handle poisoned by an earlier panic")
    })
}

/// sysinfo-backed source. Handles persist across reads so CPU usage and
/// network totals are computed against the previous refresh. The process
/// table has its own handle: a slow full refresh must not hold up cpu/mem.
pub struct SysinfoSource {
    sys: Mutex<System>,
    procs: Mutex<System>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
    // first non-loopback interface, chosen on first use
    default_iface: Mutex<Option<String>>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        // prime usage counters; the first real read is a tick later
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
            procs: Mutex::new(System::new()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            default_iface: Mutex::new(None),
        }
    }

    fn pick_interface(networks: &Networks) -> Option<String> {
        let mut names: Vec<&String> = networks.keys().filter(|n| !is_loopback(n)).collect();
        names.sort();
        names.first().map(|n| n.to_string())
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

fn is_loopback(name: &str) -> bool {
    let l = name.to_ascii_lowercase();
    l == "lo" || l.starts_with("lo0") || l.contains("loopback")
}

impl CounterSource for SysinfoSource {
    fn read_cpu_percent(&self) -> Result<f32, CounterError> {
        let mut sys = lock(&self.sys, Metric::Cpu)?;
        sys.refresh_cpu_usage();
        if sys.cpus().is_empty() {
            return Err(CounterError::unavailable(Metric::Cpu, "cpu list empty"));
        }
        Ok(sys.global_cpu_usage().clamp(0.0, 100.0))
    }

    fn read_mem_percent(&self) -> Result<f32, CounterError> {
        let mut sys = lock(&self.sys, Metric::Memory)?;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(CounterError::unavailable(
                Metric::Memory,
                "total memory reported as 0",
            ));
        }
        let used = total.saturating_sub(sys.available_memory());
        Ok((used as f64 / total as f64 * 100.0) as f32)
    }

    fn read_disk(&self, volume: &str) -> Result<DiskUsage, CounterError> {
        let mut disks = lock(&self.disks, Metric::Disk)?;
        disks.refresh(true);
        disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new(volume))
            .map(|d| DiskUsage {
                total_bytes: d.total_space(),
                free_bytes: d.available_space(),
            })
            .ok_or_else(|| {
                CounterError::unavailable(Metric::Disk, format!("no disk mounted at {volume}"))
            })
    }

    fn read_net_bytes_received(&self, interface: Option<&str>) -> Result<u64, CounterError> {
        let mut networks = lock(&self.networks, Metric::Network)?;
        networks.refresh(true);

        let name = match interface {
            Some(n) => n.to_string(),
            None => {
                let mut chosen = lock(&self.default_iface, Metric::Network)?;
                if chosen.as_ref().is_none_or(|n| !networks.contains_key(n)) {
                    *chosen = Self::pick_interface(&networks);
                    if let Some(n) = chosen.as_ref() {
                        debug!(interface = %n, "selected default network interface");
                    }
                }
                chosen.clone().ok_or_else(|| {
                    CounterError::unavailable(Metric::Network, "no non-loopback interface")
                })?
            }
        };

        networks
            .get(&name)
            .map(|data| data.total_received())
            .ok_or_else(|| {
                CounterError::unavailable(Metric::Network, format!("interface {name} not found"))
            })
    }

    #[cfg(target_os = "linux")]
    fn list_connections(&self) -> Result<Vec<Connection>, CounterError> {
        let v4 = std::fs::read_to_string("/proc/net/tcp")
            .map_err(|e| CounterError::unavailable(Metric::Connections, e.to_string()))?;
        let mut conns = parse_proc_net_tcp(&v4);
        // tcp6 is absent when IPv6 is disabled
        if let Ok(v6) = std::fs::read_to_string("/proc/net/tcp6") {
            conns.extend(parse_proc_net_tcp(&v6));
        }
        conns.retain(|c| c.state != TcpState::Listen);
        Ok(conns)
    }

    #[cfg(not(target_os = "linux"))]
    fn list_connections(&self) -> Result<Vec<Connection>, CounterError> {
        Err(CounterError::Unsupported {
            metric: Metric::Connections,
        })
    }

    fn list_processes_by_memory(&self) -> Result<Vec<ProcessEntry>, CounterError> {
        let mut sys = lock(&self.procs, Metric::Processes)?;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let mut procs: Vec<(u32, ProcessEntry)> = sys
            .processes()
            .values()
            .map(|p| {
                (
                    p.pid().as_u32(),
                    ProcessEntry::new(p.name().to_string_lossy().into_owned(), p.memory()),
                )
            })
            .collect();
        // pid order gives the ranker a stable enumeration order
        procs.sort_by_key(|(pid, _)| *pid);
        Ok(procs.into_iter().map(|(_, p)| p).collect())
    }
}

/// Parses `/proc/net/tcp` or `/proc/net/tcp6`. Malformed rows are skipped.
pub fn parse_proc_net_tcp(contents: &str) -> Vec<Connection> {
    contents
        .lines()
        .skip(1) // header
        .filter_map(|line| {
            let mut it = line.split_whitespace();
            let _sl = it.next()?;
            let local = parse_endpoint(it.next()?)?;
            let remote = parse_endpoint(it.next()?)?;
            let state = u8::from_str_radix(it.next()?, 16).ok()?;
            Some(Connection {
                local,
                remote,
                state: TcpState::from_code(state),
            })
        })
        .collect()
}

// "0100007F:0CEA" -> 127.0.0.1:3306; the address is printed as native-endian
// 32-bit words, so each word's bytes come out reversed on little-endian hosts.
fn parse_endpoint(s: &str) -> Option<SocketAddr> {
    let (addr, port) = s.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => {
            let w = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(w.to_le_bytes()))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_mut(4).enumerate() {
                let w = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&w.to_le_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP4: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   109        0 21371 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:C738 22D8B85D:01BB 01 00000000:00000000 02:00000A2B 00000000  1000        0 53110 2 0000000000000000 20 4 30 10 -1
   2: 0F02000A:C73A 22D8B85D:01BB 06 00000000:00000000 03:00001770 00000000     0        0 0 3 0000000000000000
   3: garbage
";

    const TCP6: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:1F90 00000000000000000000000001000000:D2F0 01 00000000:00000000 00:00000000 00000000  1000        0 61234 1 0000000000000000 20 4 0 10 -1
";

    #[test]
    fn parses_ipv4_rows_and_states() {
        let conns = parse_proc_net_tcp(TCP4);
        assert_eq!(conns.len(), 3);
        assert_eq!(conns[0].local, "127.0.0.1:3306".parse().unwrap());
        assert_eq!(conns[0].state, TcpState::Listen);
        assert_eq!(conns[1].local, "10.0.2.15:51000".parse().unwrap());
        assert_eq!(conns[1].remote, "93.184.216.34:443".parse().unwrap());
        assert_eq!(conns[1].state, TcpState::Established);
        assert_eq!(conns[2].state, TcpState::TimeWait);
    }

    #[test]
    fn parses_ipv6_loopback() {
        let conns = parse_proc_net_tcp(TCP6);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].local, "[::1]:8080".parse().unwrap());
        assert_eq!(conns[0].remote.port(), 0xD2F0);
        assert_eq!(
            conns[0].to_string(),
            "[::1]:8080 -> [::1]:54000 [Established]"
        );
    }

    #[test]
    fn rejects_odd_address_widths() {
        assert!(parse_endpoint("7F0001:0050").is_none());
        assert!(parse_endpoint("0100007F").is_none());
        assert!(parse_endpoint("0100007F:ZZZZ").is_none());
    }

    #[test]
    fn process_refresh_does_not_hold_up_cpu_and_memory() {
        let src = std::sync::Arc::new(SysinfoSource::new());
        // stand in for a slow full process refresh
        let held = src.procs.lock().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = std::sync::Arc::clone(&src);
        std::thread::spawn(move || {
            let _ = tx.send((reader.read_cpu_percent(), reader.read_mem_percent()));
        });
        let (cpu, mem) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("cpu/mem blocked behind the process handle");
        assert!(cpu.is_ok());
        assert!(mem.is_ok());
        drop(held);
    }

    #[test]
    fn loopback_names() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(is_loopback("Loopback Pseudo-Interface 1"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("wlan0"));
    }
}
