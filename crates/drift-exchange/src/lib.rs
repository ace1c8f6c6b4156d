//! # drift-exchange
//!
//! One opportunistic exchange between two peers, end to end:
//!
//! - [`envelope`] — the legacy JSON message envelope (field names are part
//!   of the deployed wire format and bit-exact)
//! - [`psi_wire`] — JSON bodies for the PSI rounds and the admission
//!   refusal
//! - [`trust`] — the trust-merge rule and outgoing trust noise
//! - [`session`] — the [`ExchangeSession`](session::ExchangeSession) state
//!   machine: version handshake, nonce echo, PSI rounds, admission check,
//!   message swap, store integration

pub mod envelope;
pub mod psi_wire;
pub mod session;
pub mod trust;

pub use session::{ExchangeSession, ExchangeSummary, Role, SessionContext};

use drift_transport::TransportError;

/// Everything that can end an exchange session.
///
/// Errors are contained within one session; none of them may terminate the
/// scheduler or poison shared state.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No progress within the session timeout.
    #[error("session timed out")]
    Timeout,

    /// The peer speaks a protocol version we cannot.
    #[error("incompatible protocol version {theirs} (ours {ours})")]
    IncompatibleVersion { ours: u32, theirs: u32 },

    /// Malformed frame, bad base64, length mismatch, nonce mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer (or we) refused the exchange for lack of mutual friends.
    #[error("insufficient trust: {common_friends} common friends, {required} required")]
    InsufficientTrust { common_friends: u32, required: u32 },

    /// Connect/read/write failure on the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Modular arithmetic failure; a bug or a hostile peer.
    #[error("crypto error: {0}")]
    Crypto(#[from] drift_crypto::CryptoError),

    /// Store access failed.
    #[error("store error: {0}")]
    Store(#[from] drift_db::DbError),
}

impl From<TransportError> for ExchangeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::MalformedFrame(m) => ExchangeError::Protocol(m),
            TransportError::FrameTooLarge { got, cap } => {
                ExchangeError::Protocol(format!("frame of {got} bytes exceeds cap of {cap}"))
            }
            other => ExchangeError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
