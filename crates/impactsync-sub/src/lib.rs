//! impactsync-sub — the chain event subscriber.
//!
//! Maintains a live log subscription against a blockchain node, decodes
//! and dispatches contract events into idempotent sink mutations,
//! replays missed events after downtime, and autonomously recovers from
//! transport failures with primary/fallback failover.
//!
//! # Pipeline
//!
//! ```text
//! ChainSubscriber (start / stop / recover)
//!     ├── LiveSubscriber    streaming logs → EventDispatcher → BlockCursor
//!     ├── RecoveryRunner    historical logs, sorted, sequential replay
//!     ├── ConnectionMonitor probe state machine, primary ↔ fallback
//!     └── EventDispatcher   admin / community / credit handlers
//! ```

pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod monitor;
pub mod recovery;
pub mod subscriber;

pub use builder::{SubscriberBuilder, SubscriberConfig};
pub use dispatcher::EventDispatcher;
pub use engine::{ChainSubscriber, SubscriberHandle};
pub use monitor::{ConnectionMonitor, LinkState, MonitorConfig, ProbeMachine, ProbeOutcome, TransportKind};
pub use recovery::{RecoveryReport, RecoveryRunner};
pub use subscriber::{LiveSubscriber, SubscriptionHandle};
