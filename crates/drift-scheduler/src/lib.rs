//! # drift-scheduler
//!
//! Decides when to talk to whom. One cooperative loop consumes discovery
//! state from the peer registry, elects an initiator per peer pair, gates
//! attempts behind cooldown and exponential backoff, and hands chosen
//! peers to exchange sessions on a bounded worker pool.

pub mod election;
pub mod history;
pub mod inbound;
pub mod scheduler;

pub use election::elect_initiator;
pub use history::{backoff_wait_ms, ExchangeHistory, PeerHistory};
pub use inbound::{InboundGuard, InboundTracker};
pub use scheduler::{AttemptOutcome, Force, PeerConnector, Scheduler, SchedulerHandle};
