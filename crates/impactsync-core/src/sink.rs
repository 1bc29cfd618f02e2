//! Reconciliation sink traits — the external surfaces the core writes to.
//!
//! The relational store, the push-notification queue, and the cache are
//! owned by the surrounding platform; the core sees them only through
//! these object-safe async traits. All mutations are idempotent-update
//! shaped: re-applying any event must be a harmless no-op.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubscriberError;
use crate::types::{Address, CommunityStatus, NotificationKind};

// ─── Row types ───────────────────────────────────────────────────────────────

/// A community row, as much of it as the core needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityRow {
    pub id: u64,
}

/// A user row, as much of it as the notification path needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: u64,
    pub language: String,
    pub push_tokens: Vec<String>,
}

// ─── PersistenceSink ─────────────────────────────────────────────────────────

/// Relational-store surface.
///
/// `rows_affected`-style results let handlers treat "zero rows matched"
/// as a reported-but-non-fatal condition rather than an exception.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Find a community by its on-chain contract address.
    async fn find_community_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<CommunityRow>, SubscriberError>;

    /// Update a community's status (and optionally its deletion
    /// timestamp). Returns the number of rows affected.
    async fn update_community_status(
        &self,
        address: &Address,
        status: CommunityStatus,
        deleted_at: Option<i64>,
    ) -> Result<u64, SubscriberError>;

    /// Link a pending community (matched by the manager who requested
    /// it) to its freshly deployed contract and mark it valid. Returns
    /// `(rows_affected, community_id)`.
    async fn update_community_on_creation(
        &self,
        request_by_address: &Address,
        contract_address: &Address,
    ) -> Result<(u64, Option<u64>), SubscriberError>;

    /// Find a user by wallet address (checksummed form).
    async fn find_user_by_address(
        &self,
        address: &str,
    ) -> Result<Option<UserRow>, SubscriberError>;

    /// All valid communities with a linked contract, for registry warm-up.
    async fn list_valid_communities(&self) -> Result<Vec<(Address, u64)>, SubscriberError>;
}

// ─── NotificationSink ────────────────────────────────────────────────────────

/// Push-notification surface. Fire-and-forget: delivery failures are the
/// sink's problem, the caller only logs them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        users: &[UserRow],
        kind: NotificationKind,
        community_id: Option<u64>,
    ) -> Result<(), SubscriberError>;
}

// ─── CacheSink ───────────────────────────────────────────────────────────────

/// Key/value cache surface, with prefix invalidation for listing keys.
#[async_trait]
pub trait CacheSink: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriberError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), SubscriberError>;

    async fn delete(&self, key: &str) -> Result<(), SubscriberError>;

    /// Invalidate every key starting with `prefix` (e.g. a community's
    /// cached beneficiary listings).
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), SubscriberError>;
}

/// Cache key prefix for a community's beneficiary listings.
pub fn beneficiary_cache_prefix(community_id: u64) -> String {
    format!("beneficiaries:{community_id}")
}
