//! Shared helpers for the drift end-to-end tests.

use std::sync::Arc;

use drift_db::{FriendStore, MessageStore};
use drift_exchange::{ExchangeSession, ExchangeSummary, Result, Role, SessionContext};
use drift_types::config::ExchangePolicy;
use drift_types::{Clock, ManualClock, TransportKind};

/// One in-memory node: stores, identity, clock.
pub struct TestNode {
    pub ctx: Arc<SessionContext>,
    pub clock: Arc<ManualClock>,
}

impl TestNode {
    /// Build a node with the given policy, identity and friend set.
    pub fn new(policy: ExchangePolicy, public_id: &[u8], friend_ids: &[&[u8]]) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let friends = FriendStore::open_memory().expect("friend store");
        for (i, id) in friend_ids.iter().enumerate() {
            friends
                .add_friend(id, None, 100 + i as u64)
                .expect("add friend");
        }
        let ctx = Arc::new(SessionContext {
            policy,
            messages: Arc::new(MessageStore::open_memory().expect("message store")),
            friends: Arc::new(friends),
            my_public_id: public_id.to_vec(),
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
        });
        Self { ctx, clock }
    }

    pub fn messages(&self) -> &MessageStore {
        &self.ctx.messages
    }
}

/// Run a full exchange between two nodes over an in-memory duplex stream.
/// `a` initiates.
pub async fn run_pair(
    a: &TestNode,
    b: &TestNode,
    transport: TransportKind,
) -> (Result<ExchangeSummary>, Result<ExchangeSummary>) {
    let (mut stream_a, mut stream_b) = tokio::io::duplex(1 << 20);
    let session_a = ExchangeSession::new(Role::Initiator, transport, Arc::clone(&a.ctx));
    let session_b = ExchangeSession::new(Role::Responder, transport, Arc::clone(&b.ctx));
    tokio::join!(session_a.run(&mut stream_a), session_b.run(&mut stream_b))
}

/// An exchange policy with deterministic trust values (no noise).
pub fn quiet_policy() -> ExchangePolicy {
    ExchangePolicy {
        trust_noise_variance: 0.0,
        min_shared_contacts_for_exchange: 0,
        ..ExchangePolicy::default()
    }
}
