//! The contract event signatures the subscriber listens for, and their
//! topic0 hashes.
//!
//! The topic filter is deliberately conservative: several contract
//! interfaces emit events at the same topic hash (e.g. `BeneficiaryAdded`
//! exists on every community contract), so topic matching alone never
//! decides anything — the dispatcher's address scoping does.

use std::sync::OnceLock;

use crate::address::keccak256;

/// Registry-admin contract: community deployed and linked to its managers.
pub const COMMUNITY_ADDED_SIG: &str =
    "CommunityAdded(address,address[],uint256,uint256,uint256,uint256,uint256)";
/// Registry-admin contract: community removed.
pub const COMMUNITY_REMOVED_SIG: &str = "CommunityRemoved(address)";
/// Community contract: beneficiary added by a manager.
pub const BENEFICIARY_ADDED_SIG: &str = "BeneficiaryAdded(address,address)";
/// Community contract: beneficiary removed by a manager.
pub const BENEFICIARY_REMOVED_SIG: &str = "BeneficiaryRemoved(address,address)";
/// Credit-program contract: loan granted to a borrower.
pub const LOAN_ADDED_SIG: &str = "LoanAdded(address,uint256,uint256,uint256,uint256)";

/// topic0 hashes of the known events, precomputed once.
#[derive(Debug)]
pub struct KnownTopics {
    pub community_added: String,
    pub community_removed: String,
    pub beneficiary_added: String,
    pub beneficiary_removed: String,
    pub loan_added: String,
}

impl KnownTopics {
    /// All topic0 values, in the order used for subscription filters.
    pub fn all(&self) -> Vec<String> {
        vec![
            self.community_added.clone(),
            self.community_removed.clone(),
            self.beneficiary_added.clone(),
            self.beneficiary_removed.clone(),
            self.loan_added.clone(),
        ]
    }
}

fn topic0(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// The process-wide known-topics table.
pub fn known_topics() -> &'static KnownTopics {
    static TOPICS: OnceLock<KnownTopics> = OnceLock::new();
    TOPICS.get_or_init(|| KnownTopics {
        community_added: topic0(COMMUNITY_ADDED_SIG),
        community_removed: topic0(COMMUNITY_REMOVED_SIG),
        beneficiary_added: topic0(BENEFICIARY_ADDED_SIG),
        beneficiary_removed: topic0(BENEFICIARY_REMOVED_SIG),
        loan_added: topic0(LOAN_ADDED_SIG),
    })
}
