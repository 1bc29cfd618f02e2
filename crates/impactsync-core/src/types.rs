//! Shared types for the event ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── Address ─────────────────────────────────────────────────────────────────

/// An EVM contract or account address, case-normalized.
///
/// Stored in canonical lowercase `0x…` form so that checksum-equal
/// addresses compare and hash identically. Display prints the canonical
/// form; checksummed rendering lives in `impactsync-evm::address`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Normalize `raw` into canonical lowercase form.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let hex = raw.strip_prefix("0x").unwrap_or(raw);
        Self(format!("0x{}", hex.to_ascii_lowercase()))
    }

    /// The canonical lowercase `0x…` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex digits without the `0x` prefix.
    pub fn hex_digits(&self) -> &str {
        &self.0[2..]
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs` / `eth_subscribe("logs")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the emitting contract address in canonical form.
    pub fn contract(&self) -> Address {
        Address::new(&self.address)
    }

    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// The event signature hash (`topics[0]`), if present.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
///
/// Malformed input maps to 0, which at worst rewinds the cursor to
/// genesis and forces an idempotent re-replay; it is logged loudly so
/// a misbehaving node is visible.
pub fn parse_hex_u64(s: &str) -> u64 {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    match u64::from_str_radix(digits, 16) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(value = s, error = %e, "malformed hex number, defaulting to 0");
            0
        }
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// Filter for which logs to subscribe to / fetch historically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only logs whose `topics[0]` is one of these (empty = all events).
    pub topic0_values: Vec<String>,
    /// Start block (inclusive) for historical queries.
    pub from_block: Option<u64>,
    /// End block (inclusive); `None` = chain head.
    pub to_block: Option<u64>,
}

impl LogFilter {
    /// Create a filter over a set of event signature hashes.
    pub fn topics(topic0_values: Vec<String>) -> Self {
        Self {
            topic0_values,
            ..Default::default()
        }
    }

    /// Set the block range for a historical query.
    pub fn range(mut self, from: u64, to: Option<u64>) -> Self {
        self.from_block = Some(from);
        self.to_block = to;
        self
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic0(&self, topic0: &str) -> bool {
        self.topic0_values.is_empty()
            || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }
}

// ─── Domain enums ────────────────────────────────────────────────────────────

/// Lifecycle status of a community record in the persistence store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunityStatus {
    /// Registered off-chain, waiting for the on-chain contract.
    Pending,
    /// Contract deployed and linked.
    Valid,
    /// Removed by the registry admin.
    Removed,
}

impl std::fmt::Display for CommunityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Valid => write!(f, "valid"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Push notification kinds enqueued by the event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    CommunityCreated,
    BeneficiaryAdded,
    LoanAdded,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
