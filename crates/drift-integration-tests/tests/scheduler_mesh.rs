//! The scheduler driving a real exchange end to end.

use std::sync::Arc;
use std::time::Duration;

use drift_exchange::{ExchangeSession, Role, SessionContext};
use drift_integration_tests::{quiet_policy, TestNode};
use drift_peers::PeerRegistry;
use drift_scheduler::{InboundTracker, PeerConnector, Scheduler};
use drift_transport::ExchangeStream;
use drift_types::config::SchedulerPolicy;
use drift_types::message::Message;
use drift_types::{Clock, TransportInfo, TransportKind};

/// Every connect lands on an in-memory responder node.
struct MeshConnector {
    responder_ctx: Arc<SessionContext>,
}

impl PeerConnector for MeshConnector {
    async fn connect(
        &self,
        kind: TransportKind,
        _address: &str,
    ) -> drift_transport::Result<Box<dyn ExchangeStream>> {
        let (initiator_side, mut responder_side) = tokio::io::duplex(1 << 20);
        let ctx = Arc::clone(&self.responder_ctx);
        tokio::spawn(async move {
            let session = ExchangeSession::new(Role::Responder, kind, ctx);
            if let Err(e) = session.run(&mut responder_side).await {
                eprintln!("responder session failed: {e}");
            }
        });
        Ok(Box::new(initiator_side))
    }
}

#[tokio::test]
async fn productive_exchange_resets_failure_count() {
    let friends: &[&[u8]] = &[b"f1", b"f2", b"f3"];
    let local = TestNode::new(quiet_policy(), b"public-a", friends);
    let remote = TestNode::new(quiet_policy(), b"public-b", friends);
    remote
        .messages()
        .add(&Message::compose("news".into(), "carried by the mesh", 500))
        .expect("seed");

    let registry = Arc::new(PeerRegistry::new());
    let policy = SchedulerPolicy {
        exchange_cooldown_seconds: 0,
        backoff_attempt_millis: 500,
        backoff_max_millis: 60_000,
        ..SchedulerPolicy::default()
    };
    let (mut scheduler, _handle) = Scheduler::new(
        policy,
        Arc::clone(&local.ctx),
        Arc::clone(&registry),
        Arc::new(MeshConnector {
            responder_ctx: Arc::clone(&remote.ctx),
        }),
        Arc::clone(&local.clock) as Arc<dyn Clock>,
        Arc::new(InboundTracker::new()),
        String::new(),
    );

    let peer_addr = "10.0.0.7:7487";
    registry
        .report(
            TransportKind::Lan,
            peer_addr,
            TransportInfo {
                address: peer_addr.to_string(),
                last_seen_ms: local.clock.now_ms(),
                rssi: None,
            },
            Some("peer-b"),
        )
        .expect("report");

    scheduler.tick(None);
    let processed = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.process_next_outcome(),
    )
    .await
    .expect("attempt must finish");
    assert!(processed);

    // The message crossed and the peer is in good standing.
    let delivered = local
        .messages()
        .get("news")
        .expect("get")
        .expect("message delivered through the scheduler");
    assert_eq!(delivered.hop_count, 1);
    assert_eq!(scheduler.failed_attempts(peer_addr), 0);

    // A second pass brings nothing new: the failure counter starts
    // climbing, which is what arms the backoff.
    local.clock.advance(1_000);
    registry
        .report(
            TransportKind::Lan,
            peer_addr,
            TransportInfo {
                address: peer_addr.to_string(),
                last_seen_ms: local.clock.now_ms(),
                rssi: None,
            },
            Some("peer-b"),
        )
        .expect("report");
    scheduler.tick(None);
    let processed = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.process_next_outcome(),
    )
    .await
    .expect("attempt must finish");
    assert!(processed);
    assert_eq!(scheduler.failed_attempts(peer_addr), 1);
}
