//! In-memory reconciliation backend.
//!
//! Implements every sink trait plus the checkpoint store in RAM, with
//! introspection helpers so tests can assert on the exact side effects
//! each event produced. All data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::SubscriberError;
use crate::sink::{CacheSink, CommunityRow, NotificationSink, PersistenceSink, UserRow};
use crate::types::{Address, CommunityStatus, NotificationKind};

/// A community row as the memory backend stores it.
#[derive(Debug, Clone)]
pub struct MemoryCommunity {
    pub id: u64,
    pub request_by: Address,
    pub contract_address: Option<Address>,
    pub status: CommunityStatus,
    pub deleted_at: Option<i64>,
}

/// A recorded notification dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub user_ids: Vec<u64>,
    pub kind: NotificationKind,
    pub community_id: Option<u64>,
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    cache: Mutex<HashMap<String, String>>,
    communities: Mutex<Vec<MemoryCommunity>>,
    users: Mutex<HashMap<Address, UserRow>>,
    notifications: Mutex<Vec<SentNotification>>,
    invalidated: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pending community registration (no contract yet).
    pub fn add_pending_community(&self, id: u64, request_by: Address) {
        self.communities.lock().unwrap().push(MemoryCommunity {
            id,
            request_by,
            contract_address: None,
            status: CommunityStatus::Pending,
            deleted_at: None,
        });
    }

    /// Seed a valid community with a linked contract.
    pub fn add_valid_community(&self, id: u64, request_by: Address, contract: Address) {
        self.communities.lock().unwrap().push(MemoryCommunity {
            id,
            request_by,
            contract_address: Some(contract),
            status: CommunityStatus::Valid,
            deleted_at: None,
        });
    }

    /// Seed a user row, keyed by wallet address.
    pub fn add_user(&self, address: Address, id: u64) {
        self.users.lock().unwrap().insert(
            address,
            UserRow {
                id,
                language: "en".into(),
                push_tokens: vec![],
            },
        );
    }

    /// Snapshot of a community row by id.
    pub fn community(&self, id: u64) -> Option<MemoryCommunity> {
        self.communities.lock().unwrap().iter().find(|c| c.id == id).cloned()
    }

    /// All notifications recorded so far.
    pub fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.lock().unwrap().clone()
    }

    /// All cache prefixes invalidated so far.
    pub fn invalidations(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, SubscriberError> {
        Ok(self.checkpoints.lock().unwrap().get(key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), SubscriberError> {
        self.checkpoints.lock().unwrap().insert(checkpoint.key.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SubscriberError> {
        self.checkpoints.lock().unwrap().remove(key);
        Ok(())
    }
}

#[async_trait]
impl CacheSink for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriberError> {
        Ok(self.cache.lock().unwrap().get(key).cloned())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        _ttl_secs: u64,
    ) -> Result<(), SubscriberError> {
        self.cache.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SubscriberError> {
        self.cache.lock().unwrap().remove(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), SubscriberError> {
        self.cache.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        self.invalidated.lock().unwrap().push(prefix.to_string());
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for MemoryBackend {
    async fn find_community_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<CommunityRow>, SubscriberError> {
        Ok(self
            .communities
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.contract_address.as_ref() == Some(address))
            .map(|c| CommunityRow { id: c.id }))
    }

    async fn update_community_status(
        &self,
        address: &Address,
        status: CommunityStatus,
        deleted_at: Option<i64>,
    ) -> Result<u64, SubscriberError> {
        let mut communities = self.communities.lock().unwrap();
        let mut affected = 0;
        for c in communities.iter_mut() {
            if c.contract_address.as_ref() == Some(address) && c.status != status {
                c.status = status;
                c.deleted_at = deleted_at;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn update_community_on_creation(
        &self,
        request_by_address: &Address,
        contract_address: &Address,
    ) -> Result<(u64, Option<u64>), SubscriberError> {
        let mut communities = self.communities.lock().unwrap();
        for c in communities.iter_mut() {
            if c.request_by == *request_by_address && c.status == CommunityStatus::Pending {
                c.contract_address = Some(contract_address.clone());
                c.status = CommunityStatus::Valid;
                return Ok((1, Some(c.id)));
            }
        }
        Ok((0, None))
    }

    async fn find_user_by_address(
        &self,
        address: &str,
    ) -> Result<Option<UserRow>, SubscriberError> {
        // Stored keys are canonical; accept checksummed input.
        let key = Address::new(address);
        Ok(self.users.lock().unwrap().get(&key).cloned())
    }

    async fn list_valid_communities(&self) -> Result<Vec<(Address, u64)>, SubscriberError> {
        Ok(self
            .communities
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.status == CommunityStatus::Valid)
            .filter_map(|c| c.contract_address.clone().map(|a| (a, c.id)))
            .collect())
    }
}

#[async_trait]
impl NotificationSink for MemoryBackend {
    async fn notify(
        &self,
        users: &[UserRow],
        kind: NotificationKind,
        community_id: Option<u64>,
    ) -> Result<(), SubscriberError> {
        self.notifications.lock().unwrap().push(SentNotification {
            user_ids: users.iter().map(|u| u.id).collect(),
            kind,
            community_id,
        });
        Ok(())
    }
}
