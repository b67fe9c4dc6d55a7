//! One monitoring session: everything that must start cold on restart lives here.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::CounterError;
use crate::feed::EventFeed;
use crate::history::{graph_value, HistoryRing};
use crate::rank::rank;
use crate::rate::estimate;
use crate::source::CounterSource;
use crate::types::{
    Connection, DiskUsage, Metric, ProcessEntry, ProcessRank, RateBasis, RateSample, RawSample,
    TelemetrySnapshot,
};

/// Raw results of one pass over the counter source.
#[derive(Debug)]
pub struct Readings {
    pub cpu: Result<f32, CounterError>,
    pub mem: Result<f32, CounterError>,
    pub disk: Result<DiskUsage, CounterError>,
    pub net: Result<u64, CounterError>,
    pub connections: Result<Vec<Connection>, CounterError>,
    pub processes: Result<Vec<ProcessEntry>, CounterError>,
}

/// One busy flag per metric, shared by every session of an engine. A read
/// that outlives its timeout keeps its flag set until it returns, and no
/// second read of that metric is started meanwhile.
#[derive(Debug, Clone)]
pub struct InFlight {
    flags: HashMap<Metric, Arc<AtomicBool>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            flags: Metric::ALL
                .iter()
                .map(|&m| (m, Arc::new(AtomicBool::new(false))))
                .collect(),
        }
    }
}

impl InFlight {
    fn flag(&self, metric: Metric) -> Arc<AtomicBool> {
        self.flags
            .get(&metric)
            .cloned()
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)))
    }

    /// Metrics whose previous read has not returned yet.
    pub fn busy(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.flags.get(m).is_some_and(|f| f.load(Ordering::Acquire)))
            .collect()
    }
}

// Clears the flag when the read returns or unwinds.
struct Busy(Arc<AtomicBool>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// Runs one blocking read on the blocking pool. Panics and timeouts come back
// as errors; a timed-out read keeps running but its result is discarded.
async fn guarded<T, F>(
    source: &Arc<dyn CounterSource>,
    metric: Metric,
    in_flight: &InFlight,
    timeout: Duration,
    read: F,
) -> Result<T, CounterError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CounterSource) -> Result<T, CounterError> + Send + 'static,
{
    let flag = in_flight.flag(metric);
    if flag.swap(true, Ordering::AcqRel) {
        debug!(%metric, "previous read still running; skipping");
        return Err(CounterError::TimedOut {
            metric,
            after: timeout,
        });
    }
    let busy = Busy(flag);
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || {
        let _busy = busy;
        read(source.as_ref())
    });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(r)) => r,
        Ok(Err(join)) => Err(CounterError::unavailable(
            metric,
            format!("reader panicked: {join}"),
        )),
        Err(_) => Err(CounterError::TimedOut {
            metric,
            after: timeout,
        }),
    }
}

/// Reads all six metrics concurrently, each under its own timeout. A metric
/// whose previous read is still running is reported as timed out.
pub async fn read_counters(
    source: &Arc<dyn CounterSource>,
    cfg: &TelemetryConfig,
    in_flight: &InFlight,
) -> Readings {
    let t = cfg.read_timeout();
    let volume = cfg.disk_volume.clone();
    let iface = cfg.interface.clone();
    let (cpu, mem, disk, net, connections, processes) = tokio::join!(
        guarded(source, Metric::Cpu, in_flight, t, |s| s.read_cpu_percent()),
        guarded(source, Metric::Memory, in_flight, t, |s| s.read_mem_percent()),
        guarded(source, Metric::Disk, in_flight, t, move |s| s.read_disk(&volume)),
        guarded(source, Metric::Network, in_flight, t, move |s| {
            s.read_net_bytes_received(iface.as_deref())
        }),
        guarded(source, Metric::Connections, in_flight, t, |s| s.list_connections()),
        guarded(source, Metric::Processes, in_flight, t, |s| {
            s.list_processes_by_memory()
        }),
    );
    Readings {
        cpu,
        mem,
        disk,
        net,
        connections,
        processes,
    }
}

// Values shown last time a read succeeded; reused while a metric is failing.
#[derive(Debug, Default)]
struct LastKnown {
    cpu: Option<f32>,
    mem: Option<f32>,
    disk: Option<DiskUsage>,
    rates: Option<RateSample>,
    connections: Vec<Connection>,
    top: Vec<ProcessRank>,
}

#[derive(Debug)]
pub struct Session {
    id: u64,
    cfg: TelemetryConfig,
    ticks: u64,
    previous: Option<RawSample>,
    history: HistoryRing,
    feed: EventFeed,
    last: LastKnown,
    failing: HashSet<Metric>,
    in_flight: InFlight,
}

impl Session {
    pub fn new(id: u64, cfg: TelemetryConfig) -> Self {
        Self {
            id,
            history: HistoryRing::from_config(&cfg),
            feed: EventFeed::new(cfg.feed_capacity),
            cfg,
            ticks: 0,
            previous: None,
            last: LastKnown::default(),
            failing: HashSet::new(),
            in_flight: InFlight::default(),
        }
    }

    /// Shares read guards with earlier sessions, so a read still stuck from
    /// before a restart is not started twice.
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// One full pass: read, derive, aggregate, assemble.
    pub async fn tick<R: Rng + ?Sized>(
        &mut self,
        source: &Arc<dyn CounterSource>,
        rng: &mut R,
    ) -> TelemetrySnapshot {
        let captured_at = Local::now();
        let readings = read_counters(source, &self.cfg, &self.in_flight).await;
        self.assemble(readings, captured_at, rng)
    }

    /// Folds already-collected readings into the session and builds the snapshot.
    pub fn assemble<R: Rng + ?Sized>(
        &mut self,
        readings: Readings,
        captured_at: DateTime<Local>,
        rng: &mut R,
    ) -> TelemetrySnapshot {
        let mut unavailable = Vec::new();
        let raw = RawSample {
            timestamp: captured_at,
            cpu_percent: self.settle(Metric::Cpu, readings.cpu, &mut unavailable),
            mem_percent: self.settle(Metric::Memory, readings.mem, &mut unavailable),
            disk: self.settle(Metric::Disk, readings.disk, &mut unavailable),
            net_bytes_received: self.settle(Metric::Network, readings.net, &mut unavailable),
            connections: self.settle(Metric::Connections, readings.connections, &mut unavailable),
            processes: self.settle(Metric::Processes, readings.processes, &mut unavailable),
        };

        let mut rates = estimate(self.previous.as_ref(), &raw, self.cfg.upload_ratio);
        if rates.basis == RateBasis::Unavailable {
            if let Some(prev) = self.last.rates {
                rates.download_kbps = prev.download_kbps;
                rates.upload_kbps = prev.upload_kbps;
            }
        } else {
            self.history.push(graph_value(rates.download_kbps, &self.cfg));
            self.last.rates = Some(rates);
        }

        if let Some(procs) = raw.processes.as_deref() {
            self.last.top = rank(procs, self.cfg.top_k);
        }
        if let Some(conns) = raw.connections.as_deref() {
            self.last.connections = conns
                .iter()
                .take(self.cfg.connection_limit)
                .cloned()
                .collect();
        }
        self.last.cpu = raw.cpu_percent.or(self.last.cpu);
        self.last.mem = raw.mem_percent.or(self.last.mem);
        self.last.disk = raw.disk.or(self.last.disk);

        let new_event = self.feed.maybe_append(rng, captured_at);

        let snapshot = TelemetrySnapshot {
            session: self.id,
            tick: self.ticks,
            captured_at,
            clock: captured_at.format("%H:%M:%S").to_string(),
            date: captured_at.format("%Y-%m-%d").to_string(),
            cpu_percent: self.last.cpu,
            mem_percent: self.last.mem,
            disk: self.last.disk,
            rates,
            history: self.history.snapshot(),
            top_processes: self.last.top.clone(),
            connections: self.last.connections.clone(),
            new_event,
            events: self.feed.lines().cloned().collect(),
            unavailable,
        };
        debug!(
            session = self.id,
            tick = self.ticks,
            download_kbps = snapshot.rates.download_kbps,
            missing = snapshot.unavailable.len(),
            "tick assembled"
        );

        self.previous = Some(raw);
        self.ticks += 1;
        snapshot
    }

    fn settle<T>(
        &mut self,
        metric: Metric,
        r: Result<T, CounterError>,
        unavailable: &mut Vec<Metric>,
    ) -> Option<T> {
        match r {
            Ok(v) => {
                if self.failing.remove(&metric) {
                    info!(%metric, "counter recovered");
                }
                Some(v)
            }
            Err(e) => {
                if self.failing.insert(metric) {
                    warn!(%metric, error = %e, "counter read failed; keeping last value");
                } else {
                    debug!(error = %e, "counter still failing");
                }
                unavailable.push(metric);
                None
            }
        }
    }
}
