//! # drift-transport
//!
//! Byte-stream transports and framing for the drift exchange protocol:
//!
//! - [`frame`] — 4-byte length-prefix framing used on stream transports
//!   (LAN TCP, Wi-Fi Direct sockets)
//! - [`ble`] — chunked framing for the BLE GATT transport, which cannot
//!   carry large payloads atomically
//! - [`gatt`] — the transfer engine over a BLE characteristic: chunk
//!   sequencing, ACK backpressure, recovery reads
//! - [`adapter`] — the transport seam the scheduler dials through, with
//!   the fixed priority order
//! - [`lan`] — the TCP implementation of that seam
//! - [`wifi`] — the Wi-Fi Direct TCP variant (group negotiation happens
//!   in the platform layer)
//!
//! Radio drivers (the GATT stack, Wi-Fi Direct group negotiation) live
//! outside this workspace; they plug in by exposing the byte-stream and
//! chunk contracts defined here.

pub mod adapter;
pub mod ble;
pub mod frame;
pub mod gatt;
pub mod lan;
pub mod wifi;

use tokio::io::{AsyncRead, AsyncWrite};

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream mid-frame.
    #[error("stream closed mid-frame")]
    Closed,

    /// A frame exceeded the hard size cap.
    #[error("frame of {got} bytes exceeds cap of {cap}")]
    FrameTooLarge { got: usize, cap: usize },

    /// A frame violated the chunk framing rules.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A GATT chunk saw neither a write-complete nor an ACK.
    #[error("characteristic transfer stalled")]
    Stalled,

    /// Connecting to the peer failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A bidirectional reliable byte stream handed to an exchange session.
pub trait ExchangeStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ExchangeStream for T {}
