//! Recovery runner — replays historical logs missed during downtime.
//!
//! The resume point comes from the block cursor (cache pointer, then the
//! pinned `recoverBlock`, then `lastBlock`). Logs are fetched from the
//! primary transport with a single fallback retry, sorted ascending by
//! block number (stable, so same-block events keep arrival order), and
//! replayed sequentially — handlers mutate shared registry state and
//! must not interleave. A per-event failure is logged and skipped; a
//! total fetch failure is surfaced loudly and leaves the recovery marker
//! in place so the next pass retries from the same point.

use std::sync::Arc;

use impactsync_core::{BlockCursor, LogFilter, SubscriberError};
use impactsync_evm::{fetch_logs_chunked, ChainRpc};

use crate::dispatcher::EventDispatcher;

/// Outcome of a completed recovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Events decoded and applied.
    pub replayed: usize,
    /// Events that failed decoding or application and were skipped.
    pub skipped: usize,
}

/// Replays missed logs through the dispatcher.
pub struct RecoveryRunner {
    dispatcher: Arc<EventDispatcher>,
    cursor: Arc<BlockCursor>,
    filter: LogFilter,
    /// Maximum block range per historical fetch.
    chunk: u64,
}

impl RecoveryRunner {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        cursor: Arc<BlockCursor>,
        filter: LogFilter,
        chunk: u64,
    ) -> Self {
        Self {
            dispatcher,
            cursor,
            filter,
            chunk,
        }
    }

    /// Run a recovery pass from the cursor's resume point to the head.
    pub async fn recover(
        &self,
        primary: &dyn ChainRpc,
        fallback: &dyn ChainRpc,
    ) -> Result<RecoveryReport, SubscriberError> {
        let from = self.cursor.resume_point().await?.unwrap_or(0);
        self.recover_from(from, primary, fallback).await
    }

    /// Run a recovery pass from an explicit block.
    pub async fn recover_from(
        &self,
        from: u64,
        primary: &dyn ChainRpc,
        fallback: &dyn ChainRpc,
    ) -> Result<RecoveryReport, SubscriberError> {
        let (head, mut logs) = match self.fetch(primary, from).await {
            Ok(fetched) => fetched,
            Err(primary_err) => {
                tracing::warn!(
                    endpoint = primary.endpoint(),
                    error = %primary_err,
                    "primary log fetch failed, retrying on fallback"
                );
                self.fetch(fallback, from).await.map_err(|fallback_err| {
                    SubscriberError::Recovery {
                        reason: format!(
                            "both transports failed: primary: {primary_err}; fallback: {fallback_err}"
                        ),
                    }
                })?
            }
        };

        // Stable sort preserves arrival order within a block.
        logs.sort_by_key(|log| log.block_number_u64());

        tracing::info!(from, head, logs = logs.len(), "replaying missed logs");

        let mut replayed = 0;
        let mut skipped = 0;
        for log in &logs {
            match self.dispatcher.dispatch(log).await {
                Ok(Some(_)) => replayed += 1,
                Ok(None) => {}
                Err(e) => {
                    // One bad event must not block recovery of the rest.
                    tracing::error!(
                        block = log.block_number_u64(),
                        tx = %log.tx_hash,
                        error = %e,
                        "event skipped during recovery"
                    );
                    skipped += 1;
                }
            }
        }

        self.cursor.finish_recovery(head).await?;
        tracing::info!(from, to = head, replayed, skipped, "recovery pass complete");

        Ok(RecoveryReport {
            from_block: from,
            to_block: head,
            replayed,
            skipped,
        })
    }

    async fn fetch(
        &self,
        rpc: &dyn ChainRpc,
        from: u64,
    ) -> Result<(u64, Vec<impactsync_core::RawLog>), SubscriberError> {
        let head = rpc.latest_block().await?;
        let logs = fetch_logs_chunked(rpc, from, head, &self.filter, self.chunk).await?;
        Ok((head, logs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use impactsync_core::memory::MemoryBackend;
    use impactsync_core::{
        Address, Checkpoint, CheckpointStore, CommunityRegistry, RawLog, LAST_BLOCK_KEY,
        RECOVER_BLOCK_KEY,
    };
    use impactsync_evm::topics::known_topics;

    const ADMIN: &str = "0xad00000000000000000000000000000000000001";
    const CREDIT: &str = "0xc0de000000000000000000000000000000000002";

    struct StubRpc {
        head: u64,
        logs: Mutex<Vec<RawLog>>,
        fail: bool,
    }

    impl StubRpc {
        fn serving(head: u64, logs: Vec<RawLog>) -> Self {
            Self { head, logs: Mutex::new(logs), fail: false }
        }

        fn down() -> Self {
            Self { head: 0, logs: Mutex::new(vec![]), fail: true }
        }
    }

    #[async_trait]
    impl ChainRpc for StubRpc {
        async fn latest_block(&self) -> Result<u64, SubscriberError> {
            if self.fail {
                return Err(SubscriberError::Rpc("unreachable".into()));
            }
            Ok(self.head)
        }
        async fn get_logs(
            &self,
            from: u64,
            to: u64,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, SubscriberError> {
            if self.fail {
                return Err(SubscriberError::Rpc("unreachable".into()));
            }
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| (from..=to).contains(&l.block_number_u64()))
                .cloned()
                .collect())
        }
        async fn subscribe_logs(
            &self,
            _filter: &LogFilter,
        ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError> {
            Err(SubscriberError::Rpc("no subscriptions".into()))
        }
        fn endpoint(&self) -> &str {
            "stub"
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

    fn runner(backend: &Arc<MemoryBackend>, registry: CommunityRegistry) -> RecoveryRunner {
        let dispatcher = Arc::new(EventDispatcher::new(
            registry,
            Address::new(ADMIN),
            Address::new(CREDIT),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        ));
        let cursor = Arc::new(BlockCursor::new(backend.clone(), backend.clone(), 10));
        RecoveryRunner::new(dispatcher, cursor, LogFilter::default(), 1000)
    }

    #[tokio::test]
    async fn replays_in_non_decreasing_block_order() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = CommunityRegistry::new();
        // Three communities so invalidation order records dispatch order.
        for (i, addr) in ["0xaaa", "0xbbb", "0xccc"].iter().enumerate() {
            registry.insert(Address::new(addr), i as u64 + 1);
        }

        // Arrival order: blocks 8, 3, 5.
        let rpc = StubRpc::serving(
            10,
            vec![
                beneficiary_log("0xbbb", 8),
                beneficiary_log("0xaaa", 3),
                beneficiary_log("0xccc", 5),
            ],
        );

        let report = runner(&backend, registry)
            .recover_from(0, &rpc, &StubRpc::down())
            .await
            .unwrap();

        assert_eq!(report.replayed, 3);
        assert_eq!(report.skipped, 0);
        // Dispatched in block order 3, 5, 8 → communities 1, 3, 2.
        assert_eq!(
            backend.invalidations(),
            vec!["beneficiaries:1", "beneficiaries:3", "beneficiaries:2"]
        );
    }

    #[tokio::test]
    async fn resumes_from_recover_block_not_last_block() {
        let backend = Arc::new(MemoryBackend::new());
        backend.save(Checkpoint::now(RECOVER_BLOCK_KEY, 100)).await.unwrap();
        backend.save(Checkpoint::now(LAST_BLOCK_KEY, 150)).await.unwrap();

        let registry = CommunityRegistry::new();
        registry.insert(Address::new("0xaaa"), 1);

        // Logs at 120 and 160: both must replay when resuming from 100.
        let rpc = StubRpc::serving(
            200,
            vec![beneficiary_log("0xaaa", 120), beneficiary_log("0xaaa", 160)],
        );

        let report = runner(&backend, registry)
            .recover(&rpc, &StubRpc::down())
            .await
            .unwrap();

        assert_eq!(report.from_block, 100);
        assert_eq!(report.replayed, 2);
    }

    #[tokio::test]
    async fn falls_back_when_primary_is_down() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = CommunityRegistry::new();
        registry.insert(Address::new("0xaaa"), 1);

        let fallback = StubRpc::serving(50, vec![beneficiary_log("0xaaa", 20)]);
        let report = runner(&backend, registry)
            .recover_from(0, &StubRpc::down(), &fallback)
            .await
            .unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(report.to_block, 50);
    }

    #[tokio::test]
    async fn both_transports_down_fails_loudly_and_keeps_marker() {
        let backend = Arc::new(MemoryBackend::new());
        backend.save(Checkpoint::now(RECOVER_BLOCK_KEY, 100)).await.unwrap();

        let err = runner(&backend, CommunityRegistry::new())
            .recover(&StubRpc::down(), &StubRpc::down())
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriberError::Recovery { .. }));
        // The marker survives so the next pass retries from the same point.
        let marker = backend.load(RECOVER_BLOCK_KEY).await.unwrap().unwrap();
        assert_eq!(marker.value, 100);
    }

    #[tokio::test]
    async fn successful_pass_clears_marker() {
        let backend = Arc::new(MemoryBackend::new());
        backend.save(Checkpoint::now(RECOVER_BLOCK_KEY, 5)).await.unwrap();

        let rpc = StubRpc::serving(30, vec![]);
        runner(&backend, CommunityRegistry::new())
            .recover(&rpc, &StubRpc::down())
            .await
            .unwrap();

        assert!(backend.load(RECOVER_BLOCK_KEY).await.unwrap().is_none());
        assert_eq!(backend.load(LAST_BLOCK_KEY).await.unwrap().unwrap().value, 30);
    }
}
