//! Data model shared by the sampling engine and its subscribers.
//! Everything published to subscribers is `Serialize` so the agent can emit JSON lines.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Local};
use serde::Serialize;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1e9;

/// The six readings pulled from a counter source on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    Network,
    Connections,
    Processes,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Cpu,
        Metric::Memory,
        Metric::Disk,
        Metric::Network,
        Metric::Connections,
        Metric::Processes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::Network => "network",
            Metric::Connections => "connections",
            Metric::Processes => "processes",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        100.0 - (self.free_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn free_gb(&self) -> f64 {
        self.free_bytes as f64 / BYTES_PER_GB
    }

    /// Short free-space label, e.g. `"118.4 GB FREE"`.
    pub fn summary(&self) -> String {
        format!("{:.1} GB FREE", self.free_gb())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TcpState {
    Established,
    SynSent,
    SynReceived,
    FinWait1,
    FinWait2,
    TimeWait,
    Closed,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    Unknown,
}

impl TcpState {
    /// Kernel state codes as printed in `/proc/net/tcp`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => TcpState::Established,
            0x02 => TcpState::SynSent,
            0x03 => TcpState::SynReceived,
            0x04 => TcpState::FinWait1,
            0x05 => TcpState::FinWait2,
            0x06 => TcpState::TimeWait,
            0x07 => TcpState::Closed,
            0x08 => TcpState::CloseWait,
            0x09 => TcpState::LastAck,
            0x0A => TcpState::Listen,
            0x0B => TcpState::Closing,
            _ => TcpState::Unknown,
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TcpState::Established => "Established",
            TcpState::SynSent => "SynSent",
            TcpState::SynReceived => "SynReceived",
            TcpState::FinWait1 => "FinWait1",
            TcpState::FinWait2 => "FinWait2",
            TcpState::TimeWait => "TimeWait",
            TcpState::Closed => "Closed",
            TcpState::CloseWait => "CloseWait",
            TcpState::LastAck => "LastAck",
            TcpState::Listen => "Listen",
            TcpState::Closing => "Closing",
            TcpState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.local, self.remote, self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub name: String,
    pub resident_bytes: u64,
}

impl ProcessEntry {
    pub fn new(name: impl Into<String>, resident_bytes: u64) -> Self {
        Self {
            name: name.into(),
            resident_bytes,
        }
    }
}

/// One tick's raw readings. A `None` field means that read failed this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub timestamp: DateTime<Local>,
    pub cpu_percent: Option<f32>,
    pub mem_percent: Option<f32>,
    pub disk: Option<DiskUsage>,
    // cumulative since interface start; may drop back to 0 on interface reset
    pub net_bytes_received: Option<u64>,
    pub connections: Option<Vec<Connection>>,
    pub processes: Option<Vec<ProcessEntry>>,
}

impl RawSample {
    /// A sample with every reading missing; tests and fallbacks fill in what they need.
    pub fn empty(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            mem_percent: None,
            disk: None,
            net_bytes_received: None,
            connections: None,
            processes: None,
        }
    }
}

/// How a [`RateSample`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    Measured,
    NoBaseline,
    CounterReset,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSample {
    pub download_kbps: f64,
    // placeholder: a fixed fraction of download, not an independent counter
    pub upload_kbps: f64,
    pub basis: RateBasis,
}

impl RateSample {
    pub fn zero(basis: RateBasis) -> Self {
        Self {
            download_kbps: 0.0,
            upload_kbps: 0.0,
            basis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub index: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRank {
    /// 1-based rank.
    pub position: usize,
    pub name: String,
    pub resident_bytes: u64,
}

impl ProcessRank {
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / BYTES_PER_MB
    }
}

impl fmt::Display for ProcessRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {}: {:.0} MB",
            self.position,
            self.name,
            self.resident_mb()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl fmt::Display for EventLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Everything a subscriber gets once per tick.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Increments on every session start; lets subscribers spot a cold restart.
    pub session: u64,
    /// 0-based tick within the session.
    pub tick: u64,
    pub captured_at: DateTime<Local>,
    pub clock: String,
    pub date: String,
    pub cpu_percent: Option<f32>,
    pub mem_percent: Option<f32>,
    pub disk: Option<DiskUsage>,
    pub rates: RateSample,
    /// Polyline plus the two closing baseline points.
    pub history: Vec<PlotPoint>,
    pub top_processes: Vec<ProcessRank>,
    pub connections: Vec<Connection>,
    pub new_event: Option<EventLine>,
    /// Whole feed, most recent first.
    pub events: Vec<EventLine>,
    /// Metrics whose read failed this tick; their fields carry the last known value.
    pub unavailable: Vec<Metric>,
}

impl TelemetrySnapshot {
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_empty()
    }
}
