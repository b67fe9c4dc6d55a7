//! Sampling scheduler: one background task per monitoring session that ticks
//! on a fixed interval and publishes each snapshot to a latest-wins channel,
//! so a slow subscriber never holds up the next tick.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TelemetryConfig;
use crate::error::EngineError;
use crate::session::{InFlight, Session};
use crate::source::CounterSource;
use crate::types::TelemetrySnapshot;

type BoxRng = Box<dyn RngCore + Send>;
type SnapshotTx = Arc<watch::Sender<Option<TelemetrySnapshot>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sampling,
}

fn os_rng() -> BoxRng {
    Box::new(StdRng::from_os_rng())
}

struct Running {
    id: u64,
    cancel: CancellationToken,
    // hands the random stream back so it continues into the next session
    handle: JoinHandle<BoxRng>,
}

pub struct TelemetryEngine {
    cfg: TelemetryConfig,
    source: Arc<dyn CounterSource>,
    tx: SnapshotTx,
    rng: Option<BoxRng>,
    running: Option<Running>,
    sessions: u64,
    // outlives sessions: a read stuck across a restart is not started again
    in_flight: InFlight,
}

impl TelemetryEngine {
    pub fn new(cfg: TelemetryConfig, source: Arc<dyn CounterSource>) -> Self {
        let cfg = cfg.validated();
        let rng: BoxRng = match cfg.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => os_rng(),
        };
        let (tx, _rx) = watch::channel(None);
        Self {
            cfg,
            source,
            tx: Arc::new(tx),
            rng: Some(rng),
            running: None,
            sessions: 0,
            in_flight: InFlight::default(),
        }
    }

    /// Replaces the event feed's random source, e.g. with a seeded one in tests.
    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.cfg
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.running {
            Some(r) if !r.handle.is_finished() => SessionState::Sampling,
            _ => SessionState::Idle,
        }
    }

    /// Starts a cold session: empty history and feed, no rate baseline.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state() == SessionState::Sampling {
            return Err(EngineError::AlreadySampling);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        if let Some(dead) = self.running.take() {
            // task ended on its own (panic); its rng is lost
            warn!(session = dead.id, "previous sampler task exited unexpectedly");
        }

        self.sessions += 1;
        let id = self.sessions;
        let session =
            Session::new(id, self.cfg.clone()).with_in_flight(self.in_flight.clone());
        let cancel = CancellationToken::new();
        let rng = self.rng.take().unwrap_or_else(os_rng);

        let handle = runtime.spawn(run(
            session,
            Arc::clone(&self.source),
            Arc::clone(&self.tx),
            cancel.clone(),
            rng,
            self.cfg.interval(),
        ));
        info!(
            session = id,
            interval_ms = self.cfg.interval_ms,
            "monitoring session started"
        );
        self.running = Some(Running { id, cancel, handle });
        Ok(())
    }

    /// Ends the session and waits for its task; nothing is published after this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        match running.handle.await {
            Ok(rng) => self.rng = Some(rng),
            Err(e) => warn!(session = running.id, error = %e, "sampler task ended abnormally"),
        }
        self.tx.send_replace(None);
        info!(session = running.id, "monitoring session stopped");
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        if let Some(r) = self.running.as_ref() {
            r.cancel.cancel();
        }
    }
}

async fn run(
    mut session: Session,
    source: Arc<dyn CounterSource>,
    tx: SnapshotTx,
    cancel: CancellationToken,
    mut rng: BoxRng,
    period: Duration,
) -> BoxRng {
    let mut ticker = interval(period);
    // a pass that overruns skips the missed ticks instead of bunching them up
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let snapshot = select! {
            biased;
            _ = cancel.cancelled() => break,
            s = session.tick(&source, &mut *rng) => s,
        };
        if cancel.is_cancelled() {
            break;
        }
        tx.send_replace(Some(snapshot));
    }
    rng
}

/// Latest-wins view of the engine's snapshots. Survives session restarts.
pub struct Subscription {
    rx: watch::Receiver<Option<TelemetrySnapshot>>,
}

impl Subscription {
    /// Waits for a snapshot this subscription has not seen yet. Returns `None`
    /// once the engine is gone.
    pub async fn next(&mut self) -> Option<TelemetrySnapshot> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(s) = self.rx.borrow_and_update().clone() {
                return Some(s);
            }
        }
    }

    /// Current snapshot, `None` while idle.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.rx.borrow().clone()
    }

    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Marks whatever is current as seen.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}
