//! One exchange, end to end, over a bidirectional byte stream.
//!
//! Phase order (strictly sequential within a session):
//!
//! 1. Version handshake — both sides send an ASCII integer and read the
//!    peer's; the effective version is the lower of the two.
//! 2. Nonce echo (LAN only) — the initiator sends 16 random bytes, the
//!    responder echoes them; a mismatch is a man-in-the-middle indicator.
//! 3. PSI rounds — blinded sets cross, replies cross, both sides compute
//!    the mutual-friend count. Skipped entirely when trust is disabled or
//!    the effective version predates PSI.
//! 4. Admission check — a side short on mutual friends sends a refusal and
//!    ends the session.
//! 5. Message swap — an ASCII count frame, then one envelope frame per
//!    message, in both directions; received messages are merged into the
//!    store.
//!
//! Every frame read or write carries the session timeout, so an idle peer
//! surfaces as [`ExchangeError::Timeout`]. Mod-exp batches run on the
//! blocking pool, never on the event loop.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tokio::time::timeout;

use drift_crypto::psi::PsiSession;
use drift_db::{FriendStore, MessageStore};
use drift_transport::frame::{read_frame, write_frame};
use drift_transport::ExchangeStream;
use drift_types::config::ExchangePolicy;
use drift_types::message::Message;
use drift_types::{Clock, TransportKind};

use crate::{envelope, psi_wire, trust, ExchangeError, Result};

/// Current protocol version. Version 2 added PSI over LAN.
pub const PROTOCOL_VERSION: u32 = 2;

/// Allocation guard on a peer's declared batch size.
const MAX_BATCH_MESSAGES: usize = 10_000;

/// The two roles in one exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection.
    Initiator,
    /// Accepted the connection.
    Responder,
}

/// Shared dependencies injected into every session.
pub struct SessionContext {
    pub policy: ExchangePolicy,
    pub messages: Arc<MessageStore>,
    pub friends: Arc<FriendStore>,
    /// The local DH public element, included in the PSI set so peers who
    /// befriended us count toward mutual friends.
    pub my_public_id: Vec<u8>,
    pub clock: Arc<dyn Clock>,
}

/// What one completed session accomplished.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExchangeSummary {
    /// The PSI cardinality (0 when the rounds were skipped).
    pub common_friends: u32,
    /// Messages sent to the peer.
    pub sent: usize,
    /// Messages that added information locally: new inserts plus trust
    /// raises.
    pub received: usize,
}

/// One exchange session. Construct fresh per connection; the PSI state
/// inside is single-use.
pub struct ExchangeSession {
    role: Role,
    transport: TransportKind,
    ctx: Arc<SessionContext>,
}

impl ExchangeSession {
    pub fn new(role: Role, transport: TransportKind, ctx: Arc<SessionContext>) -> Self {
        Self {
            role,
            transport,
            ctx,
        }
    }

    /// Drive the session to completion.
    pub async fn run<S: ExchangeStream>(&self, stream: &mut S) -> Result<ExchangeSummary> {
        let version = self.exchange_versions(stream).await?;
        if self.transport == TransportKind::Lan {
            self.nonce_echo(stream).await?;
        }

        let psi_ran = self.ctx.policy.use_trust && version >= 2;
        let common_friends = if psi_ran {
            let common = self.run_psi(stream).await?;
            self.admission_check(stream, common).await?;
            common
        } else {
            0
        };

        let (sent, received) = self.swap_messages(stream, common_friends).await?;
        tracing::info!(
            role = ?self.role,
            common_friends,
            sent,
            received,
            "exchange complete"
        );
        Ok(ExchangeSummary {
            common_friends,
            sent,
            received,
        })
    }

    async fn send<S: ExchangeStream>(&self, stream: &mut S, payload: &[u8]) -> Result<()> {
        match timeout(self.step_timeout(), write_frame(stream, payload)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    async fn recv<S: ExchangeStream>(&self, stream: &mut S) -> Result<Vec<u8>> {
        match timeout(self.step_timeout(), read_frame(stream)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.ctx.policy.exchange_session_timeout_ms)
    }

    /// Phase 1: swap ASCII protocol versions; effective = min(ours, theirs).
    async fn exchange_versions<S: ExchangeStream>(&self, stream: &mut S) -> Result<u32> {
        self.send(stream, PROTOCOL_VERSION.to_string().as_bytes())
            .await?;
        let frame = self.recv(stream).await?;
        let text = std::str::from_utf8(&frame)
            .map_err(|_| ExchangeError::Protocol("version frame is not UTF-8".into()))?;
        let theirs: u32 = text
            .trim()
            .parse()
            .map_err(|_| ExchangeError::Protocol(format!("bad version frame {text:?}")))?;
        if theirs < 1 {
            return Err(ExchangeError::IncompatibleVersion {
                ours: PROTOCOL_VERSION,
                theirs,
            });
        }
        Ok(PROTOCOL_VERSION.min(theirs))
    }

    /// Phase 2 (LAN only): fresh-nonce echo.
    async fn nonce_echo<S: ExchangeStream>(&self, stream: &mut S) -> Result<()> {
        match self.role {
            Role::Initiator => {
                let mut nonce = [0u8; 16];
                rand::RngCore::fill_bytes(&mut OsRng, &mut nonce);
                self.send(stream, &nonce).await?;
                let echo = self.recv(stream).await?;
                if echo != nonce {
                    return Err(ExchangeError::Protocol("nonce echo mismatch".into()));
                }
            }
            Role::Responder => {
                let nonce = self.recv(stream).await?;
                if nonce.len() != 16 {
                    return Err(ExchangeError::Protocol(format!(
                        "nonce of {} bytes, expected 16",
                        nonce.len()
                    )));
                }
                self.send(stream, &nonce).await?;
            }
        }
        Ok(())
    }

    /// Phase 3: the PSI rounds. Returns the mutual-friend count.
    async fn run_psi<S: ExchangeStream>(&self, stream: &mut S) -> Result<u32> {
        let mut items = self.ctx.friends.all_friend_ids()?;
        if !items.contains(&self.ctx.my_public_id) {
            items.push(self.ctx.my_public_id.clone());
        }
        let psi = spawn_worker(move || PsiSession::new(&items, &mut OsRng)).await?;
        let my_blinded = psi_wire::encode_blinded_set(&psi.encode_blinded())?;

        // Round A: initiator's blinded set. Round B: responder's.
        let peer_blinded = match self.role {
            Role::Initiator => {
                self.send(stream, &my_blinded).await?;
                psi_wire::decode_blinded_set(&self.recv(stream).await?)?
            }
            Role::Responder => {
                let peer = psi_wire::decode_blinded_set(&self.recv(stream).await?)?;
                self.send(stream, &my_blinded).await?;
                peer
            }
        };

        let (psi, my_reply) = spawn_worker(move || {
            let reply = psi.reply(&peer_blinded, &mut OsRng);
            (psi, reply)
        })
        .await?;
        let my_reply = psi_wire::encode_reply(&my_reply?)?;

        // Round C: replies cross, initiator first.
        let peer_reply = match self.role {
            Role::Initiator => {
                self.send(stream, &my_reply).await?;
                psi_wire::decode_reply(&self.recv(stream).await?)?
            }
            Role::Responder => {
                let peer = psi_wire::decode_reply(&self.recv(stream).await?)?;
                self.send(stream, &my_reply).await?;
                peer
            }
        };

        let shared = spawn_worker(move || psi.cardinality(&peer_reply)).await??;
        tracing::debug!(common_friends = shared, "PSI rounds complete");
        Ok(shared as u32)
    }

    /// Phase 4: refuse the exchange when mutual friends fall short.
    async fn admission_check<S: ExchangeStream>(
        &self,
        stream: &mut S,
        common_friends: u32,
    ) -> Result<()> {
        let required = self.ctx.policy.min_shared_contacts_for_exchange;
        if common_friends >= required {
            return Ok(());
        }
        let refusal = psi_wire::encode_refusal(common_friends, required)?;
        self.send(stream, &refusal).await?;
        tracing::info!(common_friends, required, "exchange refused");
        Err(ExchangeError::InsufficientTrust {
            common_friends,
            required,
        })
    }

    /// Phase 5: both directions of the message batch.
    async fn swap_messages<S: ExchangeStream>(
        &self,
        stream: &mut S,
        common_friends: u32,
    ) -> Result<(usize, usize)> {
        let now_ms = self.ctx.clock.now_ms();
        let outgoing = self.ctx.messages.eligible_for_exchange(
            common_friends,
            self.ctx.policy.max_messages_per_exchange,
            now_ms,
        )?;

        let received = match self.role {
            Role::Initiator => {
                self.send_batch(stream, &outgoing).await?;
                self.recv_batch(stream, common_friends).await?
            }
            Role::Responder => {
                let received = self.recv_batch(stream, common_friends).await?;
                self.send_batch(stream, &outgoing).await?;
                received
            }
        };
        Ok((outgoing.len(), received))
    }

    async fn send_batch<S: ExchangeStream>(
        &self,
        stream: &mut S,
        outgoing: &[Message],
    ) -> Result<()> {
        self.send(stream, outgoing.len().to_string().as_bytes())
            .await?;
        for msg in outgoing {
            let frame = envelope::encode_message(msg, &self.ctx.policy, &mut OsRng)?;
            self.send(stream, &frame).await?;
        }
        Ok(())
    }

    async fn recv_batch<S: ExchangeStream>(
        &self,
        stream: &mut S,
        common_friends: u32,
    ) -> Result<usize> {
        let head = self.recv(stream).await?;
        if let Some(refusal) = psi_wire::try_decode_refusal(&head) {
            return Err(ExchangeError::InsufficientTrust {
                common_friends: refusal.common_friends,
                required: refusal.required,
            });
        }
        let text = std::str::from_utf8(&head)
            .map_err(|_| ExchangeError::Protocol("batch count frame is not UTF-8".into()))?;
        let count: usize = text
            .trim()
            .parse()
            .map_err(|_| ExchangeError::Protocol(format!("bad batch count {text:?}")))?;
        if count > MAX_BATCH_MESSAGES {
            return Err(ExchangeError::Protocol(format!(
                "peer declared {count} messages, cap is {MAX_BATCH_MESSAGES}"
            )));
        }

        let my_friend_count = self.ctx.friends.friend_count()? as u32;
        let mut productive = 0usize;
        for _ in 0..count {
            let frame = self.recv(stream).await?;
            let incoming = envelope::decode_message(&frame, self.ctx.clock.now_ms())?;
            if self.integrate(incoming, common_friends, my_friend_count)? {
                productive += 1;
            }
        }
        Ok(productive)
    }

    /// Merge one received message into the store. Returns whether it added
    /// information (new insert or trust raise).
    ///
    /// Store mutations are never rolled back when a session later fails:
    /// the protocol is additive.
    fn integrate(
        &self,
        incoming: Message,
        common_friends: u32,
        my_friend_count: u32,
    ) -> Result<bool> {
        if incoming.body.is_empty() {
            return Ok(false);
        }
        match self.ctx.messages.get(&incoming.id)? {
            None => {
                // A first sighting gets the boost too, with the trust floor
                // standing in for the missing stored value.
                let mut incoming = incoming;
                incoming.trust = trust::merge_trust(
                    drift_types::TRUST_MIN,
                    incoming.trust,
                    common_friends,
                    my_friend_count,
                );
                self.ctx.messages.add(&incoming)?;
                Ok(true)
            }
            Some(existing) => {
                let merged = trust::merge_trust(
                    existing.trust,
                    incoming.trust,
                    common_friends,
                    my_friend_count,
                );
                if merged > existing.trust {
                    self.ctx.messages.update_trust(&existing.id, merged)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

async fn spawn_worker<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExchangeError::Transport(format!("worker task failed: {e}")))
}
