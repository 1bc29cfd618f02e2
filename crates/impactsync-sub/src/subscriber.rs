//! Live subscriber — streams new logs into the dispatcher.
//!
//! Each incoming log is dispatched and then the cursor's fast pointer is
//! advanced; the durable checkpoint is batched inside `BlockCursor`. The
//! subscription task is aborted outright on rebind — no graceful drain —
//! and the recovery pass that follows reconciliation covers anything in
//! flight.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use impactsync_core::{BlockCursor, LogFilter, SubscriberError};
use impactsync_evm::ChainRpc;

use crate::dispatcher::EventDispatcher;

/// Opens and services a streaming log subscription.
pub struct LiveSubscriber {
    dispatcher: Arc<EventDispatcher>,
    cursor: Arc<BlockCursor>,
    filter: LogFilter,
}

/// Handle to a running subscription task.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
    closed: oneshot::Receiver<()>,
}

impl SubscriptionHandle {
    /// Resolves when the underlying subscription stream closes — the
    /// transport-failure signal the engine reacts to.
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }

    /// Abort the subscription task outright.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl LiveSubscriber {
    pub fn new(dispatcher: Arc<EventDispatcher>, cursor: Arc<BlockCursor>, filter: LogFilter) -> Self {
        Self {
            dispatcher,
            cursor,
            filter,
        }
    }

    /// Open the subscription on `rpc` and start servicing it.
    pub async fn start(&self, rpc: Arc<dyn ChainRpc>) -> Result<SubscriptionHandle, SubscriberError> {
        let mut rx = rpc.subscribe_logs(&self.filter).await?;
        tracing::info!(endpoint = rpc.endpoint(), "log subscription open");

        let dispatcher = self.dispatcher.clone();
        let cursor = self.cursor.clone();
        let endpoint = rpc.endpoint().to_string();
        let (closed_tx, closed_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                let block = log.block_number_u64();
                if let Err(e) = dispatcher.dispatch(&log).await {
                    // Live path continues past individual failures.
                    tracing::error!(block, tx = %log.tx_hash, error = %e, "live event failed");
                }
                if let Err(e) = cursor.record_live(block).await {
                    tracing::error!(block, error = %e, "checkpoint write failed");
                }
            }
            tracing::warn!(endpoint = %endpoint, "log subscription closed");
            let _ = closed_tx.send(());
        });

        Ok(SubscriptionHandle { task, closed: closed_rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use impactsync_core::memory::MemoryBackend;
    use impactsync_core::{Address, CheckpointStore, CommunityRegistry, RawLog, LAST_BLOCK_KEY};
    use impactsync_evm::topics::known_topics;

    struct ChannelRpc {
        sender: Mutex<Option<mpsc::UnboundedSender<RawLog>>>,
    }

    #[async_trait]
    impl ChainRpc for ChannelRpc {
        async fn latest_block(&self) -> Result<u64, SubscriberError> {
            Ok(0)
        }
        async fn get_logs(
            &self,
            _from: u64,
            _to: u64,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, SubscriberError> {
            Ok(vec![])
        }
        async fn subscribe_logs(
            &self,
            _filter: &LogFilter,
        ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }
        fn endpoint(&self) -> &str {
            "channel"
        }
    }

    fn topic_for(addr: &str) -> String {
        let digits = addr.strip_prefix("0x").unwrap_or(addr);
        format!("0x{:0>64}", digits.to_ascii_lowercase())
    }

    fn beneficiary_log(community: &str, block: u64) -> RawLog {
        RawLog {
            address: community.into(),
            topics: vec![
                known_topics().beneficiary_added.clone(),
                topic_for("0x1111111111111111111111111111111111111111"),
                topic_for("0x2222222222222222222222222222222222222222"),
            ],
            data: "0x".into(),
            block_number: format!("0x{block:x}"),
            tx_hash: format!("0xt{block:x}"),
            log_index: "0x0".into(),
            removed: None,
        }
    }

    #[tokio::test]
    async fn dispatches_incoming_logs_and_advances_cursor() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = CommunityRegistry::new();
        registry.insert(Address::new("0xaaa"), 1);

        let dispatcher = Arc::new(EventDispatcher::new(
            registry,
            Address::new("0xad"),
            Address::new("0xcr"),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        ));
        // Interval 1 → durable save on every event, easy to observe.
        let cursor = Arc::new(BlockCursor::new(backend.clone(), backend.clone(), 1));
        let subscriber = LiveSubscriber::new(dispatcher, cursor, LogFilter::default());

        let rpc = Arc::new(ChannelRpc { sender: Mutex::new(None) });
        let mut handle = subscriber.start(rpc.clone()).await.unwrap();

        let tx = rpc.sender.lock().unwrap().clone().unwrap();
        tx.send(beneficiary_log("0xaaa", 21)).unwrap();
        tx.send(beneficiary_log("0xaaa", 22)).unwrap();
        drop(tx);
        rpc.sender.lock().unwrap().take();

        // Stream closed → task drains remaining logs, then signals.
        handle.closed().await;

        assert_eq!(backend.invalidations().len(), 2);
        assert_eq!(backend.load(LAST_BLOCK_KEY).await.unwrap().unwrap().value, 22);
    }

    #[tokio::test]
    async fn closed_resolves_when_stream_drops() {
        let backend = Arc::new(MemoryBackend::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            CommunityRegistry::new(),
            Address::new("0xad"),
            Address::new("0xcr"),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        ));
        let cursor = Arc::new(BlockCursor::new(backend.clone(), backend.clone(), 10));
        let subscriber = LiveSubscriber::new(dispatcher, cursor, LogFilter::default());

        let rpc = Arc::new(ChannelRpc { sender: Mutex::new(None) });
        let mut handle = subscriber.start(rpc.clone()).await.unwrap();

        rpc.sender.lock().unwrap().take(); // drop the only sender
        handle.closed().await; // must resolve, not hang
    }
}
