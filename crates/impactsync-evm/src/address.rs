//! Address helpers — EIP-55 checksums and topic extraction.

use tiny_keccak::{Hasher, Keccak};

use impactsync_core::{Address, SubscriberError};

/// keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// Render an address in EIP-55 checksummed form (`0xAbC…`).
///
/// The platform's user table keys wallets by checksummed address, so
/// every user lookup goes through this.
pub fn to_checksum(address: &Address) -> String {
    let digits = address.hex_digits();
    let hash = keccak256(digits.as_bytes());

    let mut out = String::with_capacity(2 + digits.len());
    out.push_str("0x");
    for (i, c) in digits.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Extract the address packed into a 32-byte indexed topic.
pub fn address_from_topic(topic: &str) -> Result<Address, SubscriberError> {
    let hex = topic.strip_prefix("0x").unwrap_or(topic);
    if hex.len() != 64 {
        return Err(SubscriberError::Decode {
            reason: format!("topic is {} hex chars, expected 64", hex.len()),
        });
    }
    // Address occupies the low 20 bytes of the word.
    Ok(Address::new(&hex[24..]))
}
