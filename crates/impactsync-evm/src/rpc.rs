//! The `ChainRpc` trait — the transport seam the subscriber is built on.
//!
//! Two independently configured endpoints (primary and fallback) of the
//! same protocol sit behind this trait; the connection monitor decides
//! which one is live at any moment.

use async_trait::async_trait;
use tokio::sync::mpsc;

use impactsync_core::{LogFilter, RawLog, SubscriberError};

/// Default maximum block range per historical `eth_getLogs` call.
pub const DEFAULT_LOG_CHUNK: u64 = 10_000;

/// The async transport trait every RPC endpoint must implement.
///
/// Object-safe; stored as `Arc<dyn ChainRpc>` so the monitor can rebind
/// the pipeline between primary and fallback.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current chain head block number.
    async fn latest_block(&self) -> Result<u64, SubscriberError>;

    /// Fetch all logs in `[from, to]` matching the filter.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, SubscriberError>;

    /// Open a streaming log subscription.
    ///
    /// The returned receiver yields logs as they arrive and closes when
    /// the underlying connection drops — that closure is the transport
    /// failure signal the engine reacts to.
    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError>;

    /// Health probe. Default: a head-number round trip.
    async fn probe(&self) -> bool {
        self.latest_block().await.is_ok()
    }

    /// The endpoint's identifier (URL or name), for logging.
    fn endpoint(&self) -> &str;
}

/// Fetch `[from, to]` in chunks of at most `chunk` blocks, so large
/// recovery ranges don't get rejected by the node.
pub async fn fetch_logs_chunked(
    rpc: &dyn ChainRpc,
    from: u64,
    to: u64,
    filter: &LogFilter,
    chunk: u64,
) -> Result<Vec<RawLog>, SubscriberError> {
    if to < from {
        return Ok(vec![]);
    }
    let chunk = chunk.max(1);
    if to - from + 1 <= chunk {
        return rpc.get_logs(from, to, filter).await;
    }
    let mut all_logs = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + chunk - 1).min(to);
        let part = rpc.get_logs(start, end, filter).await?;
        all_logs.extend(part);
        start = end + 1;
    }
    Ok(all_logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RangeRecorder {
        calls: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl ChainRpc for RangeRecorder {
        async fn latest_block(&self) -> Result<u64, SubscriberError> {
            Ok(0)
        }
        async fn get_logs(
            &self,
            from: u64,
            to: u64,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, SubscriberError> {
            self.calls.lock().unwrap().push((from, to));
            Ok(vec![])
        }
        async fn subscribe_logs(
            &self,
            _filter: &LogFilter,
        ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError> {
            Err(SubscriberError::Rpc("not supported".into()))
        }
        fn endpoint(&self) -> &str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn chunked_fetch_splits_large_ranges() {
        let rpc = RangeRecorder { calls: Mutex::new(vec![]) };
        fetch_logs_chunked(&rpc, 0, 250, &LogFilter::default(), 100).await.unwrap();

        let calls = rpc.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(0, 99), (100, 199), (200, 250)]);
    }

    #[tokio::test]
    async fn small_range_is_one_call() {
        let rpc = RangeRecorder { calls: Mutex::new(vec![]) };
        fetch_logs_chunked(&rpc, 10, 20, &LogFilter::default(), 100).await.unwrap();
        assert_eq!(rpc.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_call_exceeds_chunk_block_count() {
        // 100 blocks fit one call; 101 blocks need two.
        let rpc = RangeRecorder { calls: Mutex::new(vec![]) };
        fetch_logs_chunked(&rpc, 0, 99, &LogFilter::default(), 100).await.unwrap();
        assert_eq!(rpc.calls.lock().unwrap().clone(), vec![(0, 99)]);

        let rpc = RangeRecorder { calls: Mutex::new(vec![]) };
        fetch_logs_chunked(&rpc, 0, 100, &LogFilter::default(), 100).await.unwrap();
        let calls = rpc.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(0, 99), (100, 100)]);
        assert!(calls.iter().all(|(f, t)| t - f + 1 <= 100));
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let rpc = RangeRecorder { calls: Mutex::new(vec![]) };
        let logs = fetch_logs_chunked(&rpc, 20, 10, &LogFilter::default(), 100).await.unwrap();
        assert!(logs.is_empty());
        assert!(rpc.calls.lock().unwrap().is_empty());
    }
}
