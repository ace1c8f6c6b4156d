//! Length-prefix framing for stream transports.
//!
//! Each frame is a 4-byte big-endian length followed by that many payload
//! bytes. The cap is a hard protocol limit on both sides: an oversized
//! outgoing payload is refused before any bytes hit the wire, and an
//! oversized incoming length aborts the stream before allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, TransportError};

/// Hard cap on a single frame payload.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Write one framed payload.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] when the payload exceeds
/// [`MAX_FRAME_SIZE`], or [`TransportError::Io`] on stream failure.
pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            got: payload.len(),
            cap: MAX_FRAME_SIZE,
        });
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed payload.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] for an oversized declared
/// length, [`TransportError::Closed`] when the peer closes mid-frame, or
/// [`TransportError::Io`] on stream failure.
pub async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    read_exact_or_closed(stream, &mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            got: len,
            cap: MAX_FRAME_SIZE,
        });
    }
    let mut payload = vec![0u8; len];
    read_exact_or_closed(stream, &mut payload).await?;
    Ok(payload)
}

async fn read_exact_or_closed<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(TransportError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, b"hello frame").await.expect("write");
        let payload = read_frame(&mut b).await.expect("read");
        assert_eq!(payload, b"hello frame");
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"").await.expect("write");
        assert!(read_frame(&mut b).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn test_sequential_frames() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        for i in 0..5u8 {
            write_frame(&mut a, &[i; 10]).await.expect("write");
        }
        for i in 0..5u8 {
            assert_eq!(read_frame(&mut b).await.expect("read"), [i; 10]);
        }
    }

    #[tokio::test]
    async fn test_oversized_write_refused() {
        let (mut a, _b) = tokio::io::duplex(64);
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            write_frame(&mut a, &big).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &(u32::MAX).to_be_bytes())
            .await
            .expect("write length");
        assert!(matches!(
            read_frame(&mut b).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_mid_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &8u32.to_be_bytes())
            .await
            .expect("write length");
        tokio::io::AsyncWriteExt::write_all(&mut a, b"hal")
            .await
            .expect("write partial");
        drop(a);
        assert!(matches!(
            read_frame(&mut b).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_max_size_frame_accepted() {
        let (mut a, mut b) = tokio::io::duplex(MAX_FRAME_SIZE + 64);
        let payload = vec![0xAB; MAX_FRAME_SIZE];
        let writer = tokio::spawn(async move {
            write_frame(&mut a, &payload).await.expect("write");
        });
        let read = read_frame(&mut b).await.expect("read");
        assert_eq!(read.len(), MAX_FRAME_SIZE);
        writer.await.expect("join");
    }
}
