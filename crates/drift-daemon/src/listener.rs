//! Inbound LAN exchange listener.

use std::sync::Arc;

use tokio::sync::broadcast;

use drift_exchange::{ExchangeSession, Role, SessionContext};
use drift_peers::PeerRegistry;
use drift_scheduler::InboundTracker;
use drift_transport::lan::LanListener;
use drift_types::{TransportInfo, TransportKind};

/// Accept inbound connections and run responder sessions until shutdown.
///
/// Each accepted connection registers the peer sighting, takes an inbound
/// guard (so the scheduler defers outbound work while we serve), and runs
/// one responder session. Session errors are logged and contained.
pub async fn serve(
    listener: LanListener,
    ctx: Arc<SessionContext>,
    registry: Arc<PeerRegistry>,
    inbound: Arc<InboundTracker>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                return;
            }
        };
        let (mut stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                continue;
            }
        };

        let now_ms = ctx.clock.now_ms();
        let address = peer_addr.to_string();
        if let Err(e) = registry.report(
            TransportKind::Lan,
            &address,
            TransportInfo {
                address: address.clone(),
                last_seen_ms: now_ms,
                rssi: None,
            },
            None,
        ) {
            tracing::warn!("peer registry unavailable: {e}");
        }

        let ctx = Arc::clone(&ctx);
        let inbound = Arc::clone(&inbound);
        tokio::spawn(async move {
            let guard = inbound.begin(ctx.clock.now_ms());
            let session = ExchangeSession::new(Role::Responder, TransportKind::Lan, Arc::clone(&ctx));
            match session.run(&mut stream).await {
                Ok(summary) => {
                    tracing::info!(
                        peer = %address,
                        received = summary.received,
                        sent = summary.sent,
                        "inbound exchange complete"
                    );
                }
                Err(e) => {
                    tracing::debug!(peer = %address, "inbound exchange failed: {e}");
                }
            }
            inbound.touch(ctx.clock.now_ms());
            drop(guard);
        });
    }
}
