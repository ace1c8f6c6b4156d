//! TCP transport for peers on the same network.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use drift_types::TransportKind;

use crate::adapter::TransportAdapter;
use crate::{ExchangeStream, Result, TransportError};

/// Dials peers over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct LanTransport;

impl TransportAdapter for LanTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Lan
    }

    async fn open(&self, address: &str) -> Result<Box<dyn ExchangeStream>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Connect(format!("{address}: {e}")))?;
        stream.set_nodelay(true)?;
        tracing::debug!(%address, "LAN stream opened");
        Ok(Box::new(stream))
    }
}

/// Accepts inbound exchange connections over TCP.
pub struct LanListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl LanListener {
    /// Bind to `addr` (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "LAN listener started");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> Result<(Box<dyn ExchangeStream>, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%peer_addr, "inbound LAN stream accepted");
        Ok((Box::new(stream), peer_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_frame, write_frame};

    #[tokio::test]
    async fn test_connect_and_frame_roundtrip() {
        let listener = LanListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let payload = read_frame(&mut stream).await.expect("read");
            write_frame(&mut stream, &payload).await.expect("echo");
        });

        let transport = LanTransport;
        let mut stream = transport.open(&addr).await.expect("open");
        write_frame(&mut stream, b"ping over lan").await.expect("write");
        assert_eq!(read_frame(&mut stream).await.expect("read"), b"ping over lan");
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = LanTransport;
        // Port 1 is essentially never listening.
        let result = transport.open("127.0.0.1:1").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
