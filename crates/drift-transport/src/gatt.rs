//! The GATT transfer engine: payloads over a BLE characteristic.
//!
//! A radio driver implements [`BleLink`]; this module supplies the
//! transfer discipline on top of it:
//!
//! - the sender cuts the payload into `Data` chunks and, after each write,
//!   waits for either the platform write-complete signal or an `Ack` frame
//!   from the peer. If neither arrives within the fallback delay it issues
//!   one read of the characteristic as an idempotent recovery, then waits
//!   one more window before giving up.
//! - the receiver reassembles chunks in arrival order (offsets must be
//!   exact) and acknowledges each one.
//!
//! The first write after connect is delayed by `initial_write_delay_ms`;
//! some peripherals drop writes issued before their CCCD subscription
//! settles.

use std::time::Duration;

use tokio::time::{sleep, timeout};

use drift_types::config::BlePolicy;

use crate::ble::{BleFrame, BleOp, Chunker, Reassembler};
use crate::{Result, TransportError};

/// A chunk-completion signal observed by the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkSignal {
    /// The platform confirmed the GATT write.
    WriteComplete,
    /// The peer acknowledged bytes up to this offset.
    Ack(u32),
}

/// The contract a BLE radio driver implements.
///
/// `write_chunk` enqueues one GATT write; `next_signal` resolves with the
/// next write-complete or inbound `Ack`; `recovery_read` performs one read
/// of the characteristic (idempotent: reading must not consume data the
/// peer still needs delivered); `recv_data` resolves with the next inbound
/// `Data` chunk.
pub trait BleLink: Send {
    fn write_chunk(
        &mut self,
        frame: BleFrame,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn next_signal(&mut self) -> impl std::future::Future<Output = Result<ChunkSignal>> + Send;

    fn recovery_read(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<ChunkSignal>>> + Send;

    fn recv_data(&mut self) -> impl std::future::Future<Output = Result<BleFrame>> + Send;
}

/// Send one payload over the characteristic.
///
/// # Errors
///
/// Returns [`TransportError::Stalled`] when a chunk sees neither a
/// write-complete nor an ACK through the recovery read, or the underlying
/// link errors.
pub async fn send_payload<L: BleLink>(
    link: &mut L,
    payload: Vec<u8>,
    policy: &BlePolicy,
) -> Result<()> {
    sleep(Duration::from_millis(policy.initial_write_delay_ms)).await;

    let fallback = Duration::from_millis(policy.gatt_read_fallback_delay_ms.max(1));
    for frame in Chunker::new(payload, policy)? {
        link.write_chunk(frame).await?;

        match timeout(fallback, link.next_signal()).await {
            Ok(signal) => {
                signal?;
            }
            Err(_) => {
                // One recovery read, then one more window.
                tracing::debug!("no write signal, issuing recovery read");
                if link.recovery_read().await?.is_none() {
                    match timeout(fallback, link.next_signal()).await {
                        Ok(signal) => {
                            signal?;
                        }
                        Err(_) => return Err(TransportError::Stalled),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Receive one payload from the characteristic, acknowledging each chunk.
pub async fn recv_payload<L: BleLink>(link: &mut L) -> Result<Vec<u8>> {
    let mut reassembler = Reassembler::new();
    let mut accumulated: u32 = 0;
    loop {
        let frame = link.recv_data().await?;
        if frame.op != BleOp::Data {
            return Err(TransportError::MalformedFrame(
                "expected data chunk".into(),
            ));
        }
        let total_len = frame.total_len;
        let chunk_len = frame.payload.len() as u32;
        let done = reassembler.accept(frame)?;
        accumulated += chunk_len;
        link.write_chunk(BleFrame::ack(total_len, accumulated)).await?;
        if let Some(payload) = done {
            return Ok(payload);
        }
    }
}
