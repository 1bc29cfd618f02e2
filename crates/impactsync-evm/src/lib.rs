//! impactsync-evm — event decoding and RPC transports.
//!
//! Turns raw EVM logs into the five contract events the reconciliation
//! core understands, and provides the `ChainRpc` transport seam (with a
//! WebSocket JSON-RPC implementation) that the live subscriber, recovery
//! runner, and connection monitor are built on.

pub mod address;
pub mod decoder;
pub mod rpc;
pub mod topics;
pub mod ws;

pub use address::{address_from_topic, to_checksum};
pub use decoder::{decode, ChainEvent, DecodedLog, LogScope};
pub use rpc::{fetch_logs_chunked, ChainRpc, DEFAULT_LOG_CHUNK};
pub use topics::{known_topics, KnownTopics};
pub use ws::WsChainRpc;
