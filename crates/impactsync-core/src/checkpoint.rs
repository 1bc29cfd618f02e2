//! Block cursor — persists ingestion progress for crash recovery.
//!
//! Two durable keys track progress:
//! - `lastBlock`: last fully-processed block number, written every
//!   `save_interval` events to bound write amplification. Up to
//!   `save_interval − 1` already-processed events may be replayed after a
//!   hard crash; every handler is idempotent, so replays are harmless.
//! - `recoverBlock`: set once when an outage begins, marking where the
//!   next recovery pass must resume. Routine progress never overwrites
//!   it; only a successfully completed recovery pass clears it.
//!
//! A fast cache side-channel mirrors `lastBlock` on every event so a
//! warm restart can resume without re-reading durable state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::SubscriberError;
use crate::sink::CacheSink;

/// Durable key for the last fully-processed block.
pub const LAST_BLOCK_KEY: &str = "lastBlock";
/// Durable key for the in-progress recovery resume point.
pub const RECOVER_BLOCK_KEY: &str = "recoverBlock";
/// Cache key mirroring `lastBlock` on every processed event.
pub const CACHE_LAST_BLOCK_KEY: &str = "subscriber:lastBlock";

const CACHE_TTL_SECS: u64 = 3600;

/// A persisted progress checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint key (`lastBlock` or `recoverBlock`).
    pub key: String,
    /// Block number.
    pub value: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Build a checkpoint stamped with the current time.
    pub fn now(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for storing and loading checkpoints.
///
/// The production implementation sits on the platform's relational
/// store; `MemoryBackend` provides an in-memory one for tests.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a checkpoint by key (returns `None` if absent).
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, SubscriberError>;

    /// Save (upsert) a checkpoint. Unconditional overwrite — only one
    /// subscriber process runs at a time.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), SubscriberError>;

    /// Delete a checkpoint.
    async fn delete(&self, key: &str) -> Result<(), SubscriberError>;
}

/// Manages `lastBlock` / `recoverBlock` progress for the subscriber.
pub struct BlockCursor {
    store: Arc<dyn CheckpointStore>,
    cache: Arc<dyn CacheSink>,
    /// How often to write the durable `lastBlock` (every N events).
    save_interval: u64,
    /// Events since the last durable save.
    counter: Mutex<u64>,
}

impl BlockCursor {
    pub fn new(store: Arc<dyn CheckpointStore>, cache: Arc<dyn CacheSink>, save_interval: u64) -> Self {
        Self {
            store,
            cache,
            save_interval: save_interval.max(1),
            counter: Mutex::new(0),
        }
    }

    /// Resolve where the next recovery pass must start.
    ///
    /// Order: cache `lastBlock` (warm restart) → durable `recoverBlock`
    /// (crash mid-recovery) → durable `lastBlock` (cold start). With
    /// `recoverBlock = 100` and `lastBlock = 150` both present and no
    /// cache entry, recovery starts from 100 — never past unprocessed
    /// blocks.
    pub async fn resume_point(&self) -> Result<Option<u64>, SubscriberError> {
        if let Some(raw) = self.cache.get(CACHE_LAST_BLOCK_KEY).await? {
            if let Ok(block) = raw.parse::<u64>() {
                return Ok(Some(block));
            }
        }
        if let Some(cp) = self.store.load(RECOVER_BLOCK_KEY).await? {
            return Ok(Some(cp.value));
        }
        Ok(self.store.load(LAST_BLOCK_KEY).await?.map(|cp| cp.value))
    }

    /// Record live progress after an event is fully processed.
    ///
    /// The cache pointer advances on every call; the durable `lastBlock`
    /// only every `save_interval` calls.
    pub async fn record_live(&self, block: u64) -> Result<(), SubscriberError> {
        self.cache
            .set_with_expiry(CACHE_LAST_BLOCK_KEY, &block.to_string(), CACHE_TTL_SECS)
            .await?;

        let due = {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            if *counter >= self.save_interval {
                *counter = 0;
                true
            } else {
                false
            }
        };
        if due {
            self.force_save(block).await?;
        }
        Ok(())
    }

    /// Immediately persist `lastBlock` (used on shutdown and after recovery).
    pub async fn force_save(&self, block: u64) -> Result<(), SubscriberError> {
        self.store.save(Checkpoint::now(LAST_BLOCK_KEY, block)).await
    }

    /// Mark the start of an outage: pin `recoverBlock` to the current
    /// resume point, but only if no recovery is already pending —
    /// repeated disconnects during one outage keep the earliest
    /// unprocessed block.
    pub async fn mark_outage(&self) -> Result<(), SubscriberError> {
        if self.store.load(RECOVER_BLOCK_KEY).await?.is_some() {
            return Ok(());
        }
        let resume = self.resume_point().await?.unwrap_or(0);
        tracing::info!(block = resume, "pinning recovery resume point");
        self.store.save(Checkpoint::now(RECOVER_BLOCK_KEY, resume)).await
    }

    /// Complete a recovery pass: advance `lastBlock` to `head` and clear
    /// the recovery marker.
    pub async fn finish_recovery(&self, head: u64) -> Result<(), SubscriberError> {
        self.force_save(head).await?;
        self.cache
            .set_with_expiry(CACHE_LAST_BLOCK_KEY, &head.to_string(), CACHE_TTL_SECS)
            .await?;
        self.store.delete(RECOVER_BLOCK_KEY).await?;
        *self.counter.lock().unwrap() = 0;
        Ok(())
    }

    /// Returns the pending recovery marker, if an outage is in progress.
    pub async fn recover_block(&self) -> Result<Option<u64>, SubscriberError> {
        Ok(self.store.load(RECOVER_BLOCK_KEY).await?.map(|cp| cp.value))
    }
}
