//! Event dispatcher — routes decoded events into sink mutations.
//!
//! Routing is by contract address: the registry-admin singleton, any
//! contract in the community registry, or the credit-program singleton.
//! Everything else is ignored.
//!
//! # Idempotence
//!
//! Every handler is safe to re-apply. Replays happen by design: the live
//! subscription and a recovery pass can overlap after a reconnect, and
//! up to `save_interval − 1` events are replayed after a hard crash.
//! "Zero rows matched" and "record not found" are reported conditions,
//! never crashes.

use std::sync::Arc;

use impactsync_core::{
    beneficiary_cache_prefix, Address, CacheSink, CommunityRegistry, CommunityStatus,
    NotificationKind, NotificationSink, PersistenceSink, RawLog, SubscriberError, UserRow,
};
use impactsync_evm::{decode, to_checksum, ChainEvent, LogScope};

/// Applies decoded contract events to the reconciliation sinks.
pub struct EventDispatcher {
    registry: CommunityRegistry,
    admin_address: Address,
    credit_address: Address,
    persistence: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn NotificationSink>,
    cache: Arc<dyn CacheSink>,
}

impl EventDispatcher {
    pub fn new(
        registry: CommunityRegistry,
        admin_address: Address,
        credit_address: Address,
        persistence: Arc<dyn PersistenceSink>,
        notifier: Arc<dyn NotificationSink>,
        cache: Arc<dyn CacheSink>,
    ) -> Self {
        Self {
            registry,
            admin_address,
            credit_address,
            persistence,
            notifier,
            cache,
        }
    }

    /// The registry this dispatcher reads and (via admin events) mutates.
    pub fn registry(&self) -> &CommunityRegistry {
        &self.registry
    }

    /// Resolve which contract interface a log belongs to.
    pub fn route(&self, raw: &RawLog) -> LogScope {
        let contract = raw.contract();
        if contract == self.admin_address {
            LogScope::Admin
        } else if contract == self.credit_address {
            LogScope::Credit
        } else if self.registry.contains(&contract) {
            LogScope::Community
        } else {
            LogScope::Unrecognized
        }
    }

    /// Decode and apply a single log.
    ///
    /// Returns the decoded event when one was recognized (whether or not
    /// its side effects found matching rows), `None` for foreign or
    /// reorg-removed logs. `Err` means a sink write failed — the caller
    /// logs it and moves on to the next event.
    pub async fn dispatch(&self, raw: &RawLog) -> Result<Option<ChainEvent>, SubscriberError> {
        if raw.is_removed() {
            return Ok(None);
        }
        let scope = self.route(raw);
        let Some(decoded) = decode(raw, scope)? else {
            return Ok(None);
        };

        tracing::debug!(
            event = decoded.event.name(),
            block = decoded.block_number,
            tx = %decoded.tx_hash,
            "dispatching event"
        );

        match &decoded.event {
            ChainEvent::CommunityAdded { community, managers } => {
                self.on_community_added(community, managers).await?
            }
            ChainEvent::CommunityRemoved { community } => {
                self.on_community_removed(community).await?
            }
            ChainEvent::BeneficiaryAdded { community, beneficiary, .. } => {
                self.on_beneficiary_changed(community, Some(beneficiary)).await?
            }
            ChainEvent::BeneficiaryRemoved { community, .. } => {
                self.on_beneficiary_changed(community, None).await?
            }
            ChainEvent::LoanAdded { borrower, loan_id } => {
                self.on_loan_added(borrower, *loan_id).await?
            }
        }
        Ok(Some(decoded.event))
    }

    // ─── Admin events ────────────────────────────────────────────────────────

    async fn on_community_added(
        &self,
        community: &Address,
        managers: &[Address],
    ) -> Result<(), SubscriberError> {
        let Some(requested_by) = managers.first() else {
            tracing::error!(community = %community, "CommunityAdded with no managers");
            return Ok(());
        };

        let (rows, community_id) = self
            .persistence
            .update_community_on_creation(requested_by, community)
            .await?;
        if rows == 0 {
            // Possibly settled by an earlier run — report and stop.
            tracing::error!(
                community = %community,
                manager = %requested_by,
                "no pending registration matched CommunityAdded"
            );
            return Ok(());
        }

        if let Some(id) = community_id {
            self.registry.insert(community.clone(), id);
            tracing::info!(community = %community, id, "community contract linked");

            if let Some(user) = self.find_user(requested_by).await? {
                self.notify(&[user], NotificationKind::CommunityCreated, Some(id)).await;
            }
        }
        Ok(())
    }

    async fn on_community_removed(&self, community: &Address) -> Result<(), SubscriberError> {
        let Some(row) = self.persistence.find_community_by_address(community).await? else {
            // Already removed, or never linked — harmless on replay.
            tracing::error!(community = %community, "CommunityRemoved for unknown community");
            return Ok(());
        };

        self.persistence
            .update_community_status(
                community,
                CommunityStatus::Removed,
                Some(chrono::Utc::now().timestamp()),
            )
            .await?;
        self.registry.remove(community);
        tracing::info!(community = %community, id = row.id, "community removed");
        Ok(())
    }

    // ─── Community events ────────────────────────────────────────────────────

    async fn on_beneficiary_changed(
        &self,
        community: &Address,
        added: Option<&Address>,
    ) -> Result<(), SubscriberError> {
        let Some(community_id) = self.registry.get(community) else {
            // The community may have been removed concurrently.
            tracing::warn!(community = %community, "beneficiary event for unregistered community");
            return Ok(());
        };

        self.cache
            .invalidate_prefix(&beneficiary_cache_prefix(community_id))
            .await?;

        if let Some(beneficiary) = added {
            if let Some(user) = self.find_user(beneficiary).await? {
                self.notify(&[user], NotificationKind::BeneficiaryAdded, Some(community_id))
                    .await;
            }
        }
        Ok(())
    }

    // ─── Credit events ───────────────────────────────────────────────────────

    async fn on_loan_added(&self, borrower: &Address, loan_id: u64) -> Result<(), SubscriberError> {
        // Loan bookkeeping is owned by the CRUD layer via the subgraph;
        // only the borrower notification happens here.
        if let Some(user) = self.find_user(borrower).await? {
            tracing::info!(borrower = %borrower, loan_id, "loan added");
            self.notify(&[user], NotificationKind::LoanAdded, None).await;
        }
        Ok(())
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    async fn find_user(&self, address: &Address) -> Result<Option<UserRow>, SubscriberError> {
        self.persistence.find_user_by_address(&to_checksum(address)).await
    }

    /// Fire-and-forget notification — failures are logged, never propagated.
    async fn notify(&self, users: &[UserRow], kind: NotificationKind, community_id: Option<u64>) {
        if let Err(e) = self.notifier.notify(users, kind, community_id).await {
            tracing::error!(error = %e, ?kind, "notification dispatch failed");
        }
    }
}
