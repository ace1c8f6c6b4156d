//! Wi-Fi Direct transport.
//!
//! Group negotiation, owner election and address assignment belong to the
//! platform layer; by the time this adapter runs, the peer is an ordinary
//! TCP endpoint inside the group. Framing is the same 4-byte length prefix
//! as LAN.

use tokio::net::TcpStream;

use drift_types::TransportKind;

use crate::adapter::TransportAdapter;
use crate::{ExchangeStream, Result, TransportError};

/// Dials peers inside an established Wi-Fi Direct group.
#[derive(Clone, Copy, Debug, Default)]
pub struct WifiDirectTransport;

impl TransportAdapter for WifiDirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WifiDirect
    }

    async fn open(&self, address: &str) -> Result<Box<dyn ExchangeStream>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Connect(format!("{address}: {e}")))?;
        stream.set_nodelay(true)?;
        tracing::debug!(%address, "Wi-Fi Direct stream opened");
        Ok(Box::new(stream))
    }
}
