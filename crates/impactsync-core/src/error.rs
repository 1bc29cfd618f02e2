//! Error types for the subscriber pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting and reconciling chain events.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Decode error: {reason}")]
    Decode { reason: String },

    #[error("Community not registered: {address}")]
    UnknownCommunity { address: String },

    #[error("{what} not found for address {address}")]
    MissingRecord { what: String, address: String },

    #[error("Recovery pass failed: {reason}")]
    Recovery { reason: String },

    #[error("Subscriber stopped: {reason}")]
    Stopped { reason: String },

    #[error("{0}")]
    Other(String),
}

impl SubscriberError {
    /// Returns `true` if the error is transient (transport-level) and the
    /// operation can be retried against the same or another endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Cache(_))
    }

    /// Returns `true` if the error is a lookup miss — expected when an
    /// event was already settled by a different run, never fatal.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::MissingRecord { .. } | Self::UnknownCommunity { .. }
        )
    }
}
