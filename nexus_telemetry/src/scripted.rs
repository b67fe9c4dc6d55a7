//! Deterministic in-memory counter source, used by `--demo` and by tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::CounterError;
use crate::source::CounterSource;
use crate::types::{Connection, DiskUsage, Metric, ProcessEntry, TcpState};

const UNSPECIFIED: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

#[derive(Debug)]
struct Script {
    cpu: f32,
    mem: f32,
    disk: DiskUsage,
    net_queue: VecDeque<u64>,
    net_last: u64,
    net_step: u64,
    connections: Vec<Connection>,
    processes: Vec<ProcessEntry>,
    failing: HashSet<Metric>,
    stalls: HashMap<Metric, Duration>,
    reads: HashMap<Metric, u64>,
}

/// Network counter: queued values are returned first, then the counter keeps
/// advancing by `net_step` per read.
#[derive(Debug)]
pub struct ScriptedSource {
    script: Mutex<Script>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                cpu: 0.0,
                mem: 0.0,
                disk: DiskUsage {
                    total_bytes: 0,
                    free_bytes: 0,
                },
                net_queue: VecDeque::new(),
                net_last: 0,
                net_step: 0,
                connections: Vec::new(),
                processes: Vec::new(),
                failing: HashSet::new(),
                stalls: HashMap::new(),
                reads: HashMap::new(),
            }),
        }
    }

    /// A plausible-looking host for demo runs.
    pub fn demo() -> Self {
        let conn = |l: &str, r: &str, state| Connection {
            local: l.parse::<SocketAddr>().unwrap_or(UNSPECIFIED),
            remote: r.parse::<SocketAddr>().unwrap_or(UNSPECIFIED),
            state,
        };
        const MB: u64 = 1024 * 1024;
        Self::new()
            .with_cpu(23.5)
            .with_mem(61.2)
            .with_disk(DiskUsage {
                total_bytes: 512_000_000_000,
                free_bytes: 118_400_000_000,
            })
            .with_net_counters([1_000_000])
            .with_net_step(150 * 1024)
            .with_connections(vec![
                conn("192.168.1.20:51544", "140.82.112.25:443", TcpState::Established),
                conn("192.168.1.20:51560", "151.101.1.69:443", TcpState::Established),
                conn("192.168.1.20:49822", "34.107.243.93:443", TcpState::TimeWait),
                conn("127.0.0.1:5432", "127.0.0.1:40112", TcpState::Established),
            ])
            .with_processes(vec![
                ProcessEntry::new("systemd", 14 * MB),
                ProcessEntry::new("postgres", 220 * MB),
                ProcessEntry::new("firefox", 1_480 * MB),
                ProcessEntry::new("code", 910 * MB),
                ProcessEntry::new("nexus_agent", 18 * MB),
                ProcessEntry::new("dockerd", 220 * MB),
                ProcessEntry::new("pipewire", 31 * MB),
            ])
    }

    fn edit(self, f: impl FnOnce(&mut Script)) -> Self {
        if let Ok(mut s) = self.script.lock() {
            f(&mut s);
        }
        self
    }

    pub fn with_cpu(self, v: f32) -> Self {
        self.edit(|s| s.cpu = v)
    }

    pub fn with_mem(self, v: f32) -> Self {
        self.edit(|s| s.mem = v)
    }

    pub fn with_disk(self, d: DiskUsage) -> Self {
        self.edit(|s| s.disk = d)
    }

    pub fn with_net_counters<I: IntoIterator<Item = u64>>(self, values: I) -> Self {
        self.edit(|s| s.net_queue.extend(values))
    }

    pub fn with_net_step(self, step: u64) -> Self {
        self.edit(|s| s.net_step = step)
    }

    pub fn with_connections(self, c: Vec<Connection>) -> Self {
        self.edit(|s| s.connections = c)
    }

    pub fn with_processes(self, p: Vec<ProcessEntry>) -> Self {
        self.edit(|s| s.processes = p)
    }

    pub fn fail(&self, metric: Metric) {
        if let Ok(mut s) = self.script.lock() {
            s.failing.insert(metric);
        }
    }

    pub fn recover(&self, metric: Metric) {
        if let Ok(mut s) = self.script.lock() {
            s.failing.remove(&metric);
        }
    }

    /// Makes reads of `metric` block for `d` before answering.
    pub fn stall(&self, metric: Metric, d: Duration) {
        if let Ok(mut s) = self.script.lock() {
            s.stalls.insert(metric, d);
        }
    }

    /// Reads of `metric` started so far, stalled and failed ones included.
    pub fn reads(&self, metric: Metric) -> u64 {
        self.script
            .lock()
            .map(|s| s.reads.get(&metric).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn read<T>(
        &self,
        metric: Metric,
        f: impl FnOnce(&mut Script) -> T,
    ) -> Result<T, CounterError> {
        let stall = {
            let mut s = self
                .script
                .lock()
                .map_err(|_| CounterError::unavailable(metric, "script poisoned"))?;
            *s.reads.entry(metric).or_insert(0) += 1;
            s.stalls.get(&metric).copied()
        };
        // sleep outside the lock so other metrics keep answering
        if let Some(d) = stall {
            std::thread::sleep(d);
        }
        let mut s = self
            .script
            .lock()
            .map_err(|_| CounterError::unavailable(metric, "script poisoned"))?;
        if s.failing.contains(&metric) {
            return Err(CounterError::unavailable(metric, "scripted failure"));
        }
        Ok(f(&mut s))
    }
}

impl CounterSource for ScriptedSource {
    fn read_cpu_percent(&self) -> Result<f32, CounterError> {
        self.read(Metric::Cpu, |s| s.cpu)
    }

    fn read_mem_percent(&self) -> Result<f32, CounterError> {
        self.read(Metric::Memory, |s| s.mem)
    }

    fn read_disk(&self, _volume: &str) -> Result<DiskUsage, CounterError> {
        self.read(Metric::Disk, |s| s.disk)
    }

    fn read_net_bytes_received(&self, _interface: Option<&str>) -> Result<u64, CounterError> {
        self.read(Metric::Network, |s| {
            s.net_last = match s.net_queue.pop_front() {
                Some(v) => v,
                None => s.net_last.saturating_add(s.net_step),
            };
            s.net_last
        })
    }

    fn list_connections(&self) -> Result<Vec<Connection>, CounterError> {
        self.read(Metric::Connections, |s| s.connections.clone())
    }

    fn list_processes_by_memory(&self) -> Result<Vec<ProcessEntry>, CounterError> {
        self.read(Metric::Processes, |s| s.processes.clone())
    }
}
