//! # drift-types
//!
//! Core value types shared across the drift workspace: messages, friends,
//! peer transport descriptors, injected clocks, and runtime policy structs.
//!
//! Everything here is a plain serde-friendly value type. Behavior lives in
//! the subsystem crates.

pub mod clock;
pub mod config;
pub mod friend;
pub mod message;
pub mod peer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BlePolicy, ExchangePolicy, RetentionPolicy, SchedulerPolicy};
pub use friend::Friend;
pub use message::{Message, TRUST_MAX, TRUST_MIN};
pub use peer::{TransportInfo, TransportKind};

/// Error types for value-level parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A public-ID string was not valid URL-safe base64.
    #[error("invalid public id encoding: {0}")]
    InvalidPublicId(String),

    /// An unknown transport kind label.
    #[error("unknown transport kind: {0}")]
    UnknownTransport(String),
}

pub type Result<T> = std::result::Result<T, TypeError>;
