//! Subscriber engine — supervises the live subscription, recovery, and
//! transport failover.
//!
//! Lifecycle per bind:
//! 1. open the streaming subscription on the active transport
//! 2. run a recovery pass for anything missed while unbound (the live
//!    stream is already up, so the two may briefly overlap; handlers are
//!    idempotent and replays are harmless)
//! 3. wait for the stream to close, a scheduled return-to-primary, or
//!    shutdown
//!
//! On close the outage marker is pinned first, then the probe cycle runs
//! until a transport stabilizes, and the loop rebinds. While running on
//! the fallback a timer periodically forces a probe cycle from the
//! primary so service migrates back once it recovers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use impactsync_core::{BlockCursor, PersistenceSink, SubscriberError};
use impactsync_evm::ChainRpc;

use crate::dispatcher::EventDispatcher;
use crate::monitor::{ConnectionMonitor, LinkState, TransportKind};
use crate::recovery::{RecoveryReport, RecoveryRunner};
use crate::subscriber::LiveSubscriber;

/// The assembled subscriber. Built by `SubscriberBuilder`.
pub struct ChainSubscriber {
    dispatcher: Arc<EventDispatcher>,
    cursor: Arc<BlockCursor>,
    persistence: Arc<dyn PersistenceSink>,
    primary: Arc<dyn ChainRpc>,
    fallback: Arc<dyn ChainRpc>,
    monitor: Arc<ConnectionMonitor>,
    live: LiveSubscriber,
    recovery: RecoveryRunner,
    primary_retry_after: Duration,
}

impl std::fmt::Debug for ChainSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSubscriber").finish_non_exhaustive()
    }
}

/// Handle to a running subscriber.
pub struct SubscriberHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Signal shutdown and wait for the supervision loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Abort without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl ChainSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dispatcher: Arc<EventDispatcher>,
        cursor: Arc<BlockCursor>,
        persistence: Arc<dyn PersistenceSink>,
        primary: Arc<dyn ChainRpc>,
        fallback: Arc<dyn ChainRpc>,
        monitor: Arc<ConnectionMonitor>,
        live: LiveSubscriber,
        recovery: RecoveryRunner,
        primary_retry_after: Duration,
    ) -> Self {
        Self {
            dispatcher,
            cursor,
            persistence,
            primary,
            fallback,
            monitor,
            live,
            recovery,
            primary_retry_after,
        }
    }

    /// Current connection lifecycle state.
    pub fn link_state(&self) -> LinkState {
        self.monitor.state()
    }

    /// The dispatcher (and through it the community registry).
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Load every valid community's contract into the registry so
    /// routing works from the first received log.
    pub async fn warm_registry(&self) -> Result<usize, SubscriberError> {
        let communities = self.persistence.list_valid_communities().await?;
        let registry = self.dispatcher.registry();
        for (address, id) in &communities {
            registry.insert(address.clone(), *id);
        }
        tracing::info!(communities = communities.len(), "community registry warmed");
        Ok(communities.len())
    }

    /// Run a single recovery pass outside the supervision loop.
    pub async fn recover(&self) -> Result<RecoveryReport, SubscriberError> {
        self.recovery.recover(&*self.primary, &*self.fallback).await
    }

    /// Start the supervision loop.
    pub fn start(self: Arc<Self>) -> SubscriberHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        SubscriberHandle { shutdown: shutdown_tx, task }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.warm_registry().await {
            tracing::error!(error = %e, "registry warm-up failed, starting empty");
        }

        let mut active = TransportKind::Primary;
        loop {
            let rpc = self.transport(active);
            let mut handle = match self.live.start(rpc).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(transport = %active, error = %e, "subscription bind failed");
                    if let Err(e) = self.cursor.mark_outage().await {
                        tracing::error!(error = %e, "failed to pin recovery marker");
                    }
                    if !self.reconnect(&mut shutdown, &mut active).await {
                        break;
                    }
                    continue;
                }
            };
            self.monitor.set_state(LinkState::Connected);

            // Stream is live; now close the gap behind it.
            if let Err(e) = self.recovery.recover(&*self.primary, &*self.fallback).await {
                // Marker stays pinned; the next bind retries the pass.
                tracing::error!(error = %e, "recovery pass failed");
            }

            let on_fallback = active == TransportKind::Fallback;
            tokio::select! {
                _ = handle.closed() => {
                    tracing::warn!(transport = %active, "subscription lost");
                    self.monitor.set_state(LinkState::Disconnected);
                    if let Err(e) = self.cursor.mark_outage().await {
                        tracing::error!(error = %e, "failed to pin recovery marker");
                    }
                    if !self.reconnect(&mut shutdown, &mut active).await {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.primary_retry_after), if on_fallback => {
                    tracing::info!("attempting return to primary transport");
                    if let Err(e) = self.cursor.mark_outage().await {
                        tracing::error!(error = %e, "failed to pin recovery marker");
                    }
                    handle.abort();
                    if !self.reconnect(&mut shutdown, &mut active).await {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    handle.abort();
                    break;
                }
            }
        }

        self.monitor.cancel_probe();
        self.monitor.set_state(LinkState::Disconnected);
        tracing::info!("subscriber stopped");
    }

    /// Probe until a transport stabilizes, or bail out on shutdown.
    /// Returns `false` when the loop should exit.
    async fn reconnect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        active: &mut TransportKind,
    ) -> bool {
        let mut stabilized = self.monitor.begin_probe(TransportKind::Primary);
        tokio::select! {
            outcome = &mut stabilized => match outcome {
                Ok(kind) => {
                    *active = kind;
                    true
                }
                // The cycle was cancelled out from under us.
                Err(_) => false,
            },
            _ = shutdown.changed() => {
                self.monitor.cancel_probe();
                false
            }
        }
    }

    fn transport(&self, kind: TransportKind) -> Arc<dyn ChainRpc> {
        match kind {
            TransportKind::Primary => self.primary.clone(),
            TransportKind::Fallback => self.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use impactsync_core::memory::MemoryBackend;
    use impactsync_core::{
        Address, CheckpointStore, CommunityRegistry, LogFilter, RawLog, RECOVER_BLOCK_KEY,
    };

    use crate::monitor::MonitorConfig;

    struct EngineRpc {
        healthy: AtomicBool,
        subscriptions: AtomicU32,
        sender: Mutex<Option<mpsc::UnboundedSender<RawLog>>>,
    }

    impl EngineRpc {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                subscriptions: AtomicU32::new(0),
                sender: Mutex::new(None),
            })
        }

        fn drop_stream(&self) {
            self.sender.lock().unwrap().take();
        }
    }

    #[async_trait]
    impl ChainRpc for EngineRpc {
        async fn latest_block(&self) -> Result<u64, SubscriberError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(10)
            } else {
                Err(SubscriberError::Rpc("down".into()))
            }
        }
        async fn get_logs(
            &self,
            _from: u64,
            _to: u64,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, SubscriberError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(vec![])
            } else {
                Err(SubscriberError::Rpc("down".into()))
            }
        }
        async fn subscribe_logs(
            &self,
            _filter: &LogFilter,
        ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError> {
            if !self.healthy.load(Ordering::Relaxed) {
                return Err(SubscriberError::Rpc("down".into()));
            }
            self.subscriptions.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::unbounded_channel();
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }
        fn endpoint(&self) -> &str {
            "engine-test"
        }
    }

    fn subscriber(
        backend: &Arc<MemoryBackend>,
        primary: Arc<EngineRpc>,
        fallback: Arc<EngineRpc>,
        primary_retry_after: Duration,
    ) -> Arc<ChainSubscriber> {
        let dispatcher = Arc::new(EventDispatcher::new(
            CommunityRegistry::new(),
            Address::new("0xad"),
            Address::new("0xcr"),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        ));
        let cursor = Arc::new(BlockCursor::new(backend.clone(), backend.clone(), 10));
        let monitor = Arc::new(ConnectionMonitor::new(
            primary.clone(),
            fallback.clone(),
            MonitorConfig::default(),
        ));
        let live = LiveSubscriber::new(dispatcher.clone(), cursor.clone(), LogFilter::default());
        let recovery = RecoveryRunner::new(
            dispatcher.clone(),
            cursor.clone(),
            LogFilter::default(),
            1000,
        );
        Arc::new(ChainSubscriber::new(
            dispatcher,
            cursor,
            backend.clone(),
            primary,
            fallback,
            monitor,
            live,
            recovery,
            primary_retry_after,
        ))
    }

    // Each iteration advances the paused clock 250 ms, so a full probe
    // cycle (over 20 s of timer sleeps) fits comfortably.
    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn warms_registry_and_binds_primary() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_valid_community(7, Address::new("0xm1"), Address::new("0xaaa"));

        let primary = EngineRpc::new(true);
        let fallback = EngineRpc::new(true);
        let sub = subscriber(&backend, primary.clone(), fallback.clone(), Duration::from_secs(30 * 60));
        let registry = sub.dispatcher().registry().clone();

        let handle = sub.clone().start();
        wait_until(|| registry.contains(&Address::new("0xaaa"))).await;
        wait_until(|| primary.subscriptions.load(Ordering::Relaxed) == 1).await;
        assert_eq!(fallback.subscriptions.load(Ordering::Relaxed), 0);
        assert_eq!(sub.link_state(), LinkState::Connected);

        handle.stop().await;
        assert_eq!(sub.link_state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_to_fallback_when_primary_dies() {
        let backend = Arc::new(MemoryBackend::new());
        let primary = EngineRpc::new(true);
        let fallback = EngineRpc::new(true);
        let sub = subscriber(&backend, primary.clone(), fallback.clone(), Duration::from_secs(30 * 60));

        let handle = sub.clone().start();
        wait_until(|| primary.subscriptions.load(Ordering::Relaxed) == 1).await;

        // Primary goes dark: stream drops and probes start failing.
        primary.healthy.store(false, Ordering::Relaxed);
        primary.drop_stream();

        wait_until(|| fallback.subscriptions.load(Ordering::Relaxed) >= 1).await;
        wait_until(|| sub.link_state() == LinkState::Connected).await;

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn returns_to_primary_after_retry_interval() {
        let backend = Arc::new(MemoryBackend::new());
        let primary = EngineRpc::new(true);
        let fallback = EngineRpc::new(true);
        let sub = subscriber(&backend, primary.clone(), fallback.clone(), Duration::from_secs(5));

        let handle = sub.clone().start();
        wait_until(|| primary.subscriptions.load(Ordering::Relaxed) == 1).await;

        primary.healthy.store(false, Ordering::Relaxed);
        primary.drop_stream();
        wait_until(|| fallback.subscriptions.load(Ordering::Relaxed) >= 1).await;
        wait_until(|| sub.link_state() == LinkState::Connected).await;

        // Let the fallback-bind recovery pass finish and clear the
        // failover's marker, so the next pin is the retry's own.
        for _ in 0..400 {
            if backend.load(RECOVER_BLOCK_KEY).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(backend.load(RECOVER_BLOCK_KEY).await.unwrap().is_none());

        // Primary recovers; the retry timer fires and pins the outage
        // marker before probing back.
        primary.healthy.store(true, Ordering::Relaxed);
        let mut pinned = false;
        for _ in 0..400 {
            if backend.load(RECOVER_BLOCK_KEY).await.unwrap().is_some() {
                pinned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(pinned, "outage marker must be pinned before migrating back");

        // Service migrates home: a fresh primary subscription, and the
        // recovery pass behind it clears the marker again.
        wait_until(|| primary.subscriptions.load(Ordering::Relaxed) >= 2).await;
        wait_until(|| sub.link_state() == LinkState::Connected).await;
        let mut cleared = false;
        for _ in 0..400 {
            if backend.load(RECOVER_BLOCK_KEY).await.unwrap().is_none() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(cleared, "recovery after migration must clear the marker");

        handle.stop().await;
    }
}
