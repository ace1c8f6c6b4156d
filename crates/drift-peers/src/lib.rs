//! # drift-peers
//!
//! The multi-transport peer registry: every discovery event from every
//! transport funnels into one thread-safe map of logical peers.

pub mod registry;

pub use registry::{PeerId, PeerRegistry, UnifiedPeer};

/// Error types for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The registry lock was poisoned by a panicking holder.
    #[error("registry lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, PeerError>;
