//! impactsync-core — foundation for the chain-event reconciliation engine.
//!
//! # Architecture
//!
//! ```text
//! SubscriberBuilder → ChainSubscriber
//!                         ├── EventDispatcher   (admin / community / credit handlers)
//!                         ├── RecoveryRunner    (historical replay, sorted by block)
//!                         ├── LiveSubscriber    (streaming log subscription)
//!                         ├── ConnectionMonitor (probe state machine, failover)
//!                         ├── BlockCursor       (lastBlock / recoverBlock checkpoints)
//!                         └── Sinks             (persistence / notifications / cache)
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod registry;
pub mod sink;
pub mod types;

pub use checkpoint::{
    BlockCursor, Checkpoint, CheckpointStore, CACHE_LAST_BLOCK_KEY, LAST_BLOCK_KEY,
    RECOVER_BLOCK_KEY,
};
pub use error::SubscriberError;
pub use memory::MemoryBackend;
pub use registry::CommunityRegistry;
pub use sink::{
    beneficiary_cache_prefix, CacheSink, CommunityRow, NotificationSink, PersistenceSink, UserRow,
};
pub use types::{Address, CommunityStatus, LogFilter, NotificationKind, RawLog};
