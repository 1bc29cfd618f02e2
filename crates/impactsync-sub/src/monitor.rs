//! Connection health monitor — probing, fallback, and restoration.
//!
//! State transitions:
//! - `Connected` → transport close → `ProbingPrimary`
//! - `ProbingPrimary` → more than `failure_threshold` consecutive failed
//!   probes → `ProbingFallback` (and vice versa — one parameterized
//!   machine serves both targets)
//! - probing → `success_threshold` consecutive successes → `Stabilizing`
//!   → `Connected` on whichever transport stabilized
//! - while connected on fallback, a timer schedules an automatic attempt
//!   to return to the primary
//!
//! Any failure while probing resets the consecutive-success counter —
//! monotonic progress is not assumed. The monitor owns at most one
//! outstanding probe task: starting a new cycle aborts the previous one,
//! so reconnect attempts never duplicate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use impactsync_evm::ChainRpc;

/// Which transport endpoint an operation is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Primary,
    Fallback,
}

impl TransportKind {
    /// The other endpoint.
    pub fn other(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Primary,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Connection lifecycle state, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    ProbingPrimary,
    ProbingFallback,
    Stabilizing,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::ProbingPrimary => write!(f, "probing-primary"),
            Self::ProbingFallback => write!(f, "probing-fallback"),
            Self::Stabilizing => write!(f, "stabilizing"),
        }
    }
}

/// Configuration for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between probes.
    pub probe_interval: Duration,
    /// Consecutive successes required to declare a transport stable.
    pub success_threshold: u32,
    /// Consecutive failures tolerated before flipping the probe target.
    pub failure_threshold: u32,
    /// While running on fallback, how long before automatically
    /// attempting to return to the primary.
    pub primary_retry_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(2),
            success_threshold: 5,
            failure_threshold: 5,
            primary_retry_after: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of recording one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Keep probing the current target.
    Continue,
    /// Failure threshold exceeded — the probe target flipped.
    SwitchedTarget(TransportKind),
    /// Success threshold reached — this transport is stable.
    Stabilized(TransportKind),
}

/// The pure probing state machine, shared by both transports.
///
/// One parameterized machine covers both directions: exceeding the
/// failure threshold flips the target, whichever endpoint is being
/// probed, with the counter resets identical on both sides.
#[derive(Debug)]
pub struct ProbeMachine {
    target: TransportKind,
    consecutive_ok: u32,
    consecutive_fail: u32,
    success_threshold: u32,
    failure_threshold: u32,
}

impl ProbeMachine {
    pub fn new(target: TransportKind, config: &MonitorConfig) -> Self {
        Self {
            target,
            consecutive_ok: 0,
            consecutive_fail: 0,
            success_threshold: config.success_threshold,
            failure_threshold: config.failure_threshold,
        }
    }

    /// The transport currently being probed.
    pub fn target(&self) -> TransportKind {
        self.target
    }

    /// Record one probe result and advance the machine.
    pub fn record(&mut self, ok: bool) -> ProbeOutcome {
        if ok {
            self.consecutive_fail = 0;
            self.consecutive_ok += 1;
            if self.consecutive_ok >= self.success_threshold {
                return ProbeOutcome::Stabilized(self.target);
            }
            return ProbeOutcome::Continue;
        }

        // A crash while probing restarts the success count from zero.
        self.consecutive_ok = 0;
        self.consecutive_fail += 1;
        if self.consecutive_fail > self.failure_threshold {
            self.consecutive_fail = 0;
            self.target = self.target.other();
            return ProbeOutcome::SwitchedTarget(self.target);
        }
        ProbeOutcome::Continue
    }
}

/// Drives probing against real transports and owns the single probe task.
pub struct ConnectionMonitor {
    primary: Arc<dyn ChainRpc>,
    fallback: Arc<dyn ChainRpc>,
    config: MonitorConfig,
    state: Arc<Mutex<LinkState>>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(primary: Arc<dyn ChainRpc>, fallback: Arc<dyn ChainRpc>, config: MonitorConfig) -> Self {
        Self {
            primary,
            fallback,
            config,
            state: Arc::new(Mutex::new(LinkState::Connected)),
            probe_task: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }

    /// Start a probe cycle against `start` and resolve once a transport
    /// stabilizes. Cancels any previous cycle first — at most one probe
    /// timer exists at any instant.
    pub fn begin_probe(&self, start: TransportKind) -> oneshot::Receiver<TransportKind> {
        let mut slot = self.probe_task.lock().unwrap();
        if let Some(prev) = slot.take() {
            tracing::warn!("cancelling pending probe cycle before starting a new one");
            prev.abort();
        }

        let (tx, rx) = oneshot::channel();
        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        let config = self.config.clone();
        let state = self.state.clone();

        *slot = Some(tokio::spawn(async move {
            let stabilized = probe_cycle(&*primary, &*fallback, &config, start, &state).await;
            let _ = tx.send(stabilized);
        }));
        rx
    }

    /// Returns `true` if a probe cycle is currently pending.
    pub fn probe_pending(&self) -> bool {
        self.probe_task
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Abort any pending probe cycle (shutdown path).
    pub fn cancel_probe(&self) {
        if let Some(task) = self.probe_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Probe until one transport stabilizes. Runs inside the single owned task.
async fn probe_cycle(
    primary: &dyn ChainRpc,
    fallback: &dyn ChainRpc,
    config: &MonitorConfig,
    start: TransportKind,
    state: &Mutex<LinkState>,
) -> TransportKind {
    let mut machine = ProbeMachine::new(start, config);
    loop {
        *state.lock().unwrap() = match machine.target() {
            TransportKind::Primary => LinkState::ProbingPrimary,
            TransportKind::Fallback => LinkState::ProbingFallback,
        };

        tokio::time::sleep(config.probe_interval).await;

        let rpc = match machine.target() {
            TransportKind::Primary => primary,
            TransportKind::Fallback => fallback,
        };
        let ok = rpc.probe().await;

        match machine.record(ok) {
            ProbeOutcome::Continue => {}
            ProbeOutcome::SwitchedTarget(next) => {
                tracing::warn!(target = %next, "probe failure threshold exceeded, switching target");
            }
            ProbeOutcome::Stabilized(kind) => {
                *state.lock().unwrap() = LinkState::Stabilizing;
                tracing::info!(transport = %kind, "transport stabilized");
                return kind;
            }
        }
    }
}
