//! Log decoder — raw EVM logs into typed contract events.
//!
//! Decoding is scope-selected: the dispatcher decides which interface a
//! log could belong to (registry admin, a known community contract, or
//! the credit program) and the decoder only attempts that interface's
//! events. A log that matches no known event for its scope is `Ok(None)`
//! — foreign logs are expected, never an error. Only a matched event
//! with malformed arguments fails, and that failure is fatal for the
//! single log alone.

use serde::{Deserialize, Serialize};

use impactsync_core::{Address, RawLog, SubscriberError};

use crate::address::address_from_topic;
use crate::topics::known_topics;

/// Which contract interface a log's address resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogScope {
    /// The registry-admin singleton.
    Admin,
    /// A contract present in the community registry.
    Community,
    /// The credit-program singleton.
    Credit,
    /// None of the above — ignored.
    Unrecognized,
}

/// A decoded contract event with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    CommunityAdded {
        community: Address,
        managers: Vec<Address>,
    },
    CommunityRemoved {
        community: Address,
    },
    BeneficiaryAdded {
        community: Address,
        manager: Address,
        beneficiary: Address,
    },
    BeneficiaryRemoved {
        community: Address,
        manager: Address,
        beneficiary: Address,
    },
    LoanAdded {
        borrower: Address,
        loan_id: u64,
    },
}

impl ChainEvent {
    /// The event's name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommunityAdded { .. } => "CommunityAdded",
            Self::CommunityRemoved { .. } => "CommunityRemoved",
            Self::BeneficiaryAdded { .. } => "BeneficiaryAdded",
            Self::BeneficiaryRemoved { .. } => "BeneficiaryRemoved",
            Self::LoanAdded { .. } => "LoanAdded",
        }
    }
}

/// A decoded event plus its on-chain coordinates.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event: ChainEvent,
    /// Emitting contract address.
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
}

/// Decode `raw` against the events of `scope`.
pub fn decode(raw: &RawLog, scope: LogScope) -> Result<Option<DecodedLog>, SubscriberError> {
    let topics = known_topics();
    let Some(topic0) = raw.topic0() else {
        return Ok(None);
    };

    let event = match scope {
        LogScope::Admin => {
            if topic0.eq_ignore_ascii_case(&topics.community_added) {
                Some(decode_community_added(raw)?)
            } else if topic0.eq_ignore_ascii_case(&topics.community_removed) {
                Some(ChainEvent::CommunityRemoved {
                    community: indexed_address(raw, 1)?,
                })
            } else {
                None
            }
        }
        LogScope::Community => {
            if topic0.eq_ignore_ascii_case(&topics.beneficiary_added) {
                Some(ChainEvent::BeneficiaryAdded {
                    community: raw.contract(),
                    manager: indexed_address(raw, 1)?,
                    beneficiary: indexed_address(raw, 2)?,
                })
            } else if topic0.eq_ignore_ascii_case(&topics.beneficiary_removed) {
                Some(ChainEvent::BeneficiaryRemoved {
                    community: raw.contract(),
                    manager: indexed_address(raw, 1)?,
                    beneficiary: indexed_address(raw, 2)?,
                })
            } else {
                None
            }
        }
        LogScope::Credit => {
            if topic0.eq_ignore_ascii_case(&topics.loan_added) {
                let data = data_bytes(raw)?;
                Some(ChainEvent::LoanAdded {
                    borrower: indexed_address(raw, 1)?,
                    loan_id: word_u64(&data, 0)?,
                })
            } else {
                None
            }
        }
        LogScope::Unrecognized => None,
    };

    Ok(event.map(|event| DecodedLog {
        event,
        address: raw.contract(),
        block_number: raw.block_number_u64(),
        tx_hash: raw.tx_hash.clone(),
        log_index: raw.log_index_u32(),
    }))
}

fn decode_community_added(raw: &RawLog) -> Result<ChainEvent, SubscriberError> {
    let community = indexed_address(raw, 1)?;
    let data = data_bytes(raw)?;
    // Head word 0 is the offset of the dynamic managers array.
    let managers = address_array_at(&data, word_u64(&data, 0)? as usize)?;
    Ok(ChainEvent::CommunityAdded { community, managers })
}

// ─── ABI helpers ─────────────────────────────────────────────────────────────

fn indexed_address(raw: &RawLog, index: usize) -> Result<Address, SubscriberError> {
    let topic = raw.topics.get(index).ok_or_else(|| SubscriberError::Decode {
        reason: format!("missing indexed topic {index}"),
    })?;
    address_from_topic(topic)
}

fn data_bytes(raw: &RawLog) -> Result<Vec<u8>, SubscriberError> {
    let hex_str = raw.data.strip_prefix("0x").unwrap_or(&raw.data);
    hex::decode(hex_str).map_err(|e| SubscriberError::Decode {
        reason: format!("invalid data hex: {e}"),
    })
}

fn word(data: &[u8], index: usize) -> Result<&[u8], SubscriberError> {
    let start = index * 32;
    data.get(start..start + 32).ok_or_else(|| SubscriberError::Decode {
        reason: format!("data too short for word {index}"),
    })
}

/// Read word `index` as a u64 (value must fit; ABI uints are 32 bytes).
fn word_u64(data: &[u8], index: usize) -> Result<u64, SubscriberError> {
    let w = word(data, index)?;
    if w[..24].iter().any(|b| *b != 0) {
        return Err(SubscriberError::Decode {
            reason: format!("word {index} exceeds u64 range"),
        });
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(buf))
}

/// Decode a dynamic `address[]` whose length word sits at byte `offset`.
fn address_array_at(data: &[u8], offset: usize) -> Result<Vec<Address>, SubscriberError> {
    if offset % 32 != 0 || offset + 32 > data.len() {
        return Err(SubscriberError::Decode {
            reason: format!("bad array offset {offset}"),
        });
    }
    let base = offset / 32;
    let len = word_u64(data, base)? as usize;
    // The length word comes straight off the wire; cap it by what the
    // data can actually hold before allocating.
    let available = (data.len() - (base + 1) * 32) / 32;
    if len > available {
        return Err(SubscriberError::Decode {
            reason: format!("array length {len} exceeds data ({available} words available)"),
        });
    }
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let w = word(data, base + 1 + i)?;
        out.push(Address::new(hex::encode(&w[12..])));
    }
    Ok(out)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
