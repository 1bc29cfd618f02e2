//! Fluent assembly of a `ChainSubscriber` from its parts.

use std::sync::Arc;

use impactsync_core::{
    BlockCursor, CacheSink, CheckpointStore, CommunityRegistry, LogFilter, NotificationSink,
    PersistenceSink, SubscriberError,
};
use impactsync_evm::{known_topics, ChainRpc, DEFAULT_LOG_CHUNK};

use crate::dispatcher::EventDispatcher;
use crate::engine::ChainSubscriber;
use crate::monitor::{ConnectionMonitor, MonitorConfig};
use crate::recovery::RecoveryRunner;
use crate::subscriber::LiveSubscriber;

/// Tunables for the assembled subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Registry-admin contract address.
    pub admin_address: String,
    /// Credit-program contract address.
    pub credit_address: String,
    /// Durable checkpoint write frequency (every N processed events).
    pub save_interval: u64,
    /// Maximum block range per historical `getLogs` call.
    pub log_chunk: u64,
    /// Probe and failover tuning.
    pub monitor: MonitorConfig,
}

impl SubscriberConfig {
    pub fn new(admin_address: impl Into<String>, credit_address: impl Into<String>) -> Self {
        Self {
            admin_address: admin_address.into(),
            credit_address: credit_address.into(),
            save_interval: 10,
            log_chunk: DEFAULT_LOG_CHUNK,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Builder wiring transports, sinks, and config into a `ChainSubscriber`.
#[derive(Default)]
pub struct SubscriberBuilder {
    config: Option<SubscriberConfig>,
    registry: Option<CommunityRegistry>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    cache: Option<Arc<dyn CacheSink>>,
    primary: Option<Arc<dyn ChainRpc>>,
    fallback: Option<Arc<dyn ChainRpc>>,
}

impl SubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SubscriberConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Pre-populated registry; by default an empty one is created and
    /// warmed from the persistence sink on start.
    pub fn registry(mut self, registry: CommunityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn notifier(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(sink);
        self
    }

    pub fn cache(mut self, sink: Arc<dyn CacheSink>) -> Self {
        self.cache = Some(sink);
        self
    }

    pub fn primary(mut self, rpc: Arc<dyn ChainRpc>) -> Self {
        self.primary = Some(rpc);
        self
    }

    pub fn fallback(mut self, rpc: Arc<dyn ChainRpc>) -> Self {
        self.fallback = Some(rpc);
        self
    }

    pub fn build(self) -> Result<ChainSubscriber, SubscriberError> {
        let config = self.config.ok_or_else(|| missing("config"))?;
        let checkpoints = self.checkpoints.ok_or_else(|| missing("checkpoints"))?;
        let persistence = self.persistence.ok_or_else(|| missing("persistence"))?;
        let notifier = self.notifier.ok_or_else(|| missing("notifier"))?;
        let cache = self.cache.ok_or_else(|| missing("cache"))?;
        let primary = self.primary.ok_or_else(|| missing("primary transport"))?;
        let fallback = self.fallback.ok_or_else(|| missing("fallback transport"))?;
        let registry = self.registry.unwrap_or_default();

        let filter = LogFilter::topics(known_topics().all());
        let dispatcher = Arc::new(EventDispatcher::new(
            registry,
            config.admin_address.as_str().into(),
            config.credit_address.as_str().into(),
            persistence.clone(),
            notifier,
            cache.clone(),
        ));
        let cursor = Arc::new(BlockCursor::new(checkpoints, cache, config.save_interval));
        let monitor = Arc::new(ConnectionMonitor::new(
            primary.clone(),
            fallback.clone(),
            config.monitor.clone(),
        ));
        let live = LiveSubscriber::new(dispatcher.clone(), cursor.clone(), filter.clone());
        let recovery = RecoveryRunner::new(
            dispatcher.clone(),
            cursor.clone(),
            filter,
            config.log_chunk,
        );

        Ok(ChainSubscriber::new(
            dispatcher,
            cursor,
            persistence,
            primary,
            fallback,
            monitor,
            live,
            recovery,
            config.monitor.primary_retry_after,
        ))
    }
}

fn missing(field: &str) -> SubscriberError {
    SubscriberError::Other(format!("subscriber builder missing {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use impactsync_core::memory::MemoryBackend;

    #[test]
    fn build_fails_without_transports() {
        let backend = Arc::new(MemoryBackend::new());
        let err = SubscriberBuilder::new()
            .config(SubscriberConfig::new("0xad", "0xcr"))
            .checkpoints(backend.clone())
            .persistence(backend.clone())
            .notifier(backend.clone())
            .cache(backend)
            .build()
            .unwrap_err();
        assert!(matches!(err, SubscriberError::Other(_)));
    }
}
