//! In-memory community registry — contract address → community id.
//!
//! Populated at startup from the persistence store, then mutated only by
//! the admin event handler (`CommunityAdded` / `CommunityRemoved`). All
//! lookups are case-normalized through [`Address`], so checksum-equal
//! addresses resolve identically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::Address;

/// Shared map of on-chain community contract addresses to internal ids.
///
/// Cheap to clone — all clones share the same underlying map. Dispatch
/// runs on a single logical flow, but the map is mutex-guarded so the
/// engine and the dispatcher can hold clones across tasks.
#[derive(Clone, Default)]
pub struct CommunityRegistry {
    entries: Arc<Mutex<HashMap<Address, u64>>>,
}

impl CommunityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted (address, id) pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Address, u64)>) -> Self {
        let entries = pairs.into_iter().collect();
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Register a new community contract.
    pub fn insert(&self, address: Address, community_id: u64) {
        self.entries.lock().unwrap().insert(address, community_id);
    }

    /// Remove a community contract; returns its id if it was present.
    pub fn remove(&self, address: &Address) -> Option<u64> {
        self.entries.lock().unwrap().remove(address)
    }

    /// Look up the community id for a contract address.
    pub fn get(&self, address: &Address) -> Option<u64> {
        self.entries.lock().unwrap().get(address).copied()
    }

    /// Returns `true` if the address belongs to a known community.
    pub fn contains(&self, address: &Address) -> bool {
        self.entries.lock().unwrap().contains_key(address)
    }

    /// Number of registered communities.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if no communities are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
