//! The scheduling loop.
//!
//! One cooperative loop per process. Each tick runs the short-circuiting
//! decision pipeline: cooldown gate, inbound defer, history prune,
//! selection, initiator election, backoff gate, attempt. Sessions run as
//! tasks on a semaphore-bounded pool; their outcomes flow back over a
//! channel so the history table stays owned by the loop. A failed session
//! never takes the loop down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Semaphore};

use drift_exchange::{ExchangeError, ExchangeSession, ExchangeSummary, Role, SessionContext};
use drift_peers::{PeerRegistry, UnifiedPeer};
use drift_transport::ExchangeStream;
use drift_types::config::SchedulerPolicy;
use drift_types::{Clock, TransportInfo, TransportKind};

use crate::election::elect_initiator;
use crate::history::{backoff_wait_ms, ExchangeHistory};
use crate::inbound::InboundTracker;

/// How recently a transport must have seen a peer for it to count as
/// visible to the scheduler.
const PEER_STALENESS_MS: u64 = 60_000;

/// External override signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Force {
    /// Skip cooldown, inbound defer, backoff and selection narrowing.
    Hard,
    /// Skip cooldown and backoff but still yield to inbound sessions.
    Soft,
}

/// Opens a byte stream to a peer address on a given transport.
///
/// The daemon wires this to its transport adapters; tests wire it to
/// in-memory duplex streams.
pub trait PeerConnector: Send + Sync + 'static {
    fn connect(
        &self,
        kind: TransportKind,
        address: &str,
    ) -> impl std::future::Future<Output = drift_transport::Result<Box<dyn ExchangeStream>>> + Send;
}

/// How one attempted exchange ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Completed and brought in at least one message.
    Productive(ExchangeSummary),
    /// Completed but nothing new arrived.
    Empty(ExchangeSummary),
    /// Failed; the error stays contained here.
    Failed(ExchangeError),
}

struct FinishedAttempt {
    address: String,
    outcome: AttemptOutcome,
}

/// Lets other subsystems poke the loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    force_tx: mpsc::Sender<Force>,
}

impl SchedulerHandle {
    /// Hard force: exchange with every visible peer now.
    pub async fn force_exchange(&self) {
        let _ = self.force_tx.send(Force::Hard).await;
    }

    /// Soft force: exchange now unless an inbound session is busy.
    pub async fn soft_force_exchange(&self) {
        let _ = self.force_tx.send(Force::Soft).await;
    }
}

/// The exchange scheduler.
pub struct Scheduler<C: PeerConnector> {
    policy: SchedulerPolicy,
    ctx: Arc<SessionContext>,
    registry: Arc<PeerRegistry>,
    connector: Arc<C>,
    clock: Arc<dyn Clock>,
    inbound: Arc<InboundTracker>,
    /// Bluetooth address when the adapter reports a real one, otherwise a
    /// stable device identifier. Feeds the initiator election.
    local_identity: String,
    history: ExchangeHistory,
    last_exchange_ms: u64,
    permits: Arc<Semaphore>,
    outcome_tx: mpsc::UnboundedSender<FinishedAttempt>,
    outcome_rx: Option<mpsc::UnboundedReceiver<FinishedAttempt>>,
    force_rx: Option<mpsc::Receiver<Force>>,
}

impl<C: PeerConnector> Scheduler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: SchedulerPolicy,
        ctx: Arc<SessionContext>,
        registry: Arc<PeerRegistry>,
        connector: Arc<C>,
        clock: Arc<dyn Clock>,
        inbound: Arc<InboundTracker>,
        local_identity: String,
    ) -> (Self, SchedulerHandle) {
        let (force_tx, force_rx) = mpsc::channel(8);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(policy.max_concurrent_sessions.max(1)));
        let scheduler = Self {
            policy,
            ctx,
            registry,
            connector,
            clock,
            inbound,
            local_identity,
            history: ExchangeHistory::new(),
            last_exchange_ms: 0,
            permits,
            outcome_tx,
            outcome_rx: Some(outcome_rx),
            force_rx: Some(force_rx),
        };
        (scheduler, SchedulerHandle { force_tx })
    }

    /// Drive the loop until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let Some(mut force_rx) = self.force_rx.take() else {
            return;
        };
        let Some(mut outcome_rx) = self.outcome_rx.take() else {
            return;
        };
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.policy.exchange_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(None),
                Some(force) = force_rx.recv() => self.tick(Some(force)),
                Some(finished) = outcome_rx.recv() => self.record_outcome(finished),
                _ = shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One pass of the decision pipeline. Spawns attempts; never blocks on
    /// them.
    pub fn tick(&mut self, force: Option<Force>) {
        let now = self.clock.now_ms();

        // 1. Cooldown gate.
        let cooldown_ms = self.policy.exchange_cooldown_seconds.saturating_mul(1000);
        if force.is_none() && now.saturating_sub(self.last_exchange_ms) < cooldown_ms {
            tracing::trace!("tick skipped: cooldown");
            return;
        }

        // 2. Inbound-session defer. A hard force pushes through.
        if force != Some(Force::Hard)
            && self
                .inbound
                .should_defer(now, self.policy.inbound_session_grace_ms)
        {
            tracing::debug!("tick deferred: inbound session active");
            return;
        }

        // 3. Prune history to the peers still visible.
        let peers = match self.registry.reachable_peers(PEER_STALENESS_MS, now) {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("peer registry unavailable: {e}");
                return;
            }
        };
        let visible: HashSet<String> = peers
            .iter()
            .flat_map(|p| p.transports.values().map(|t| t.address.clone()))
            .collect();
        self.history.prune_to(&visible);

        // 4. Selection: one least-recently-picked peer, unless configured
        // (or hard-forced) to sweep everyone.
        let candidates: Vec<UnifiedPeer> =
            if force == Some(Force::Hard) || !self.policy.random_exchange {
                peers
            } else {
                self.pick_least_recently_picked(peers).into_iter().collect()
            };

        let Ok(current_version) = self.ctx.messages.store_version() else {
            return;
        };

        for peer in candidates {
            let transports = peer.transports_by_priority();
            let Some((_, primary)) = transports.first() else {
                continue;
            };
            let address = primary.address.clone();

            // 5. Initiator election: both sides hash the identity pair and
            // agree on a single dialer.
            if !elect_initiator(&self.local_identity, &address) {
                tracing::trace!(peer = %address, "peer is the elected initiator");
                continue;
            }

            // 6. Backoff gate, bypassed whenever the local store changed
            // since the last attempt: a new message can make a previously
            // unproductive peer worth dialing immediately.
            if force.is_none() && self.policy.use_backoff {
                if let Some(entry) = self.history.get(&address) {
                    if entry.last_store_version == current_version {
                        let wait = backoff_wait_ms(
                            self.policy.backoff_attempt_millis,
                            self.policy.backoff_max_millis,
                            entry.failed_attempts,
                        );
                        if now.saturating_sub(entry.last_exchange_ms) < wait {
                            tracing::trace!(peer = %address, wait, "tick skipped: backoff");
                            continue;
                        }
                    }
                }
            }

            // 7. Attempt on the worker pool.
            self.history.record_picked(&address, now, current_version);
            tracing::debug!(peer = %address, "launching exchange attempt");
            tokio::spawn(attempt_exchange(
                Arc::clone(&self.connector),
                Arc::clone(&self.ctx),
                transports,
                address,
                self.outcome_tx.clone(),
                Arc::clone(&self.permits),
            ));
        }
    }

    /// Await and record the next finished attempt. Returns `false` once
    /// the outcome channel is gone. Used by `run` indirectly and by tests
    /// directly.
    pub async fn process_next_outcome(&mut self) -> bool {
        let finished = match self.outcome_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };
        match finished {
            Some(finished) => {
                self.record_outcome(finished);
                true
            }
            None => false,
        }
    }

    fn record_outcome(&mut self, finished: FinishedAttempt) {
        let now = self.clock.now_ms();
        let Ok(version) = self.ctx.messages.store_version() else {
            return;
        };
        let productive = match &finished.outcome {
            AttemptOutcome::Productive(summary) => {
                tracing::info!(peer = %finished.address, received = summary.received, "productive exchange");
                true
            }
            AttemptOutcome::Empty(_) => {
                tracing::debug!(peer = %finished.address, "exchange brought nothing new");
                false
            }
            AttemptOutcome::Failed(e) => {
                tracing::debug!(peer = %finished.address, "exchange failed: {e}");
                false
            }
        };
        self.history
            .record_attempt(&finished.address, productive, now, version);
        self.last_exchange_ms = now;
    }

    /// Least-recently-picked selection: peers with no history first, then
    /// oldest pick, ties broken by strongest signal.
    fn pick_least_recently_picked(&self, peers: Vec<UnifiedPeer>) -> Option<UnifiedPeer> {
        peers.into_iter().min_by_key(|peer| {
            let address = peer
                .transports_by_priority()
                .first()
                .map(|(_, info)| info.address.clone())
                .unwrap_or_default();
            let picked = self.history.last_picked_ms(&address);
            (
                picked.is_some(),
                picked.unwrap_or(0),
                std::cmp::Reverse(peer.best_rssi().unwrap_or(i32::MIN)),
            )
        })
    }

    /// Number of addresses currently tracked (diagnostics).
    pub fn tracked_peers(&self) -> usize {
        self.history.len()
    }

    /// The failure count for an address (diagnostics and tests).
    pub fn failed_attempts(&self, address: &str) -> u32 {
        self.history
            .get(address)
            .map(|h| h.failed_attempts)
            .unwrap_or(0)
    }
}

/// One attempt: dial the peer's transports in priority order, run the
/// session over the first stream that opens, report the outcome.
async fn attempt_exchange<C: PeerConnector>(
    connector: Arc<C>,
    ctx: Arc<SessionContext>,
    transports: Vec<(TransportKind, TransportInfo)>,
    address: String,
    outcome_tx: mpsc::UnboundedSender<FinishedAttempt>,
    permits: Arc<Semaphore>,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };
    let outcome = run_attempt(connector, ctx, &transports).await;
    let _ = outcome_tx.send(FinishedAttempt { address, outcome });
}

async fn run_attempt<C: PeerConnector>(
    connector: Arc<C>,
    ctx: Arc<SessionContext>,
    transports: &[(TransportKind, TransportInfo)],
) -> AttemptOutcome {
    let mut last_error: Option<ExchangeError> = None;
    for (kind, info) in transports {
        match connector.connect(*kind, &info.address).await {
            Ok(mut stream) => {
                let session = ExchangeSession::new(Role::Initiator, *kind, Arc::clone(&ctx));
                return match session.run(&mut stream).await {
                    Ok(summary) if summary.received > 0 => AttemptOutcome::Productive(summary),
                    Ok(summary) => AttemptOutcome::Empty(summary),
                    Err(e) => AttemptOutcome::Failed(e),
                };
            }
            Err(e) => {
                tracing::debug!(
                    transport = %kind,
                    address = %info.address,
                    "connect failed, falling back: {e}"
                );
                last_error = Some(e.into());
            }
        }
    }
    AttemptOutcome::Failed(
        last_error.unwrap_or_else(|| ExchangeError::Transport("no dialable transport".into())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_db::{FriendStore, MessageStore};
    use drift_transport::TransportError;
    use drift_types::config::ExchangePolicy;
    use drift_types::ManualClock;

    struct RefusingConnector;

    impl PeerConnector for RefusingConnector {
        async fn connect(
            &self,
            _kind: TransportKind,
            _address: &str,
        ) -> drift_transport::Result<Box<dyn ExchangeStream>> {
            Err(TransportError::Connect("connection refused".into()))
        }
    }

    fn context() -> Arc<SessionContext> {
        Arc::new(SessionContext {
            policy: ExchangePolicy::default(),
            messages: Arc::new(MessageStore::open_memory().expect("messages")),
            friends: Arc::new(FriendStore::open_memory().expect("friends")),
            my_public_id: b"me".to_vec(),
            clock: Arc::new(ManualClock::new(1_000_000)),
        })
    }

    fn scheduler(
        policy: SchedulerPolicy,
        clock: Arc<ManualClock>,
    ) -> (Scheduler<RefusingConnector>, Arc<PeerRegistry>) {
        let registry = Arc::new(PeerRegistry::new());
        let (scheduler, _handle) = Scheduler::new(
            policy,
            context(),
            Arc::clone(&registry),
            Arc::new(RefusingConnector),
            clock,
            Arc::new(InboundTracker::new()),
            // An empty identity elects the local side unconditionally,
            // keeping these tests independent of the hash outcome.
            String::new(),
        );
        (scheduler, registry)
    }

    fn see_peer(registry: &PeerRegistry, address: &str, now_ms: u64) {
        registry
            .report(
                TransportKind::Lan,
                address,
                TransportInfo {
                    address: address.to_string(),
                    last_seen_ms: now_ms,
                    rssi: None,
                },
                Some(address),
            )
            .expect("report");
    }

    #[tokio::test]
    async fn test_attempt_failure_recorded() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mut scheduler, registry) = scheduler(SchedulerPolicy::default(), Arc::clone(&clock));
        see_peer(&registry, "10.0.0.2:7000", 1_000_000);

        scheduler.tick(None);
        assert!(scheduler.process_next_outcome().await);
        assert_eq!(scheduler.failed_attempts("10.0.0.2:7000"), 1);
    }

    #[tokio::test]
    async fn test_cooldown_gates_next_tick() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mut scheduler, registry) = scheduler(SchedulerPolicy::default(), Arc::clone(&clock));
        see_peer(&registry, "10.0.0.2:7000", 1_000_000);

        scheduler.tick(None);
        assert!(scheduler.process_next_outcome().await);

        // Within the cooldown window nothing launches, not even with the
        // backoff satisfied.
        clock.advance(1_000);
        scheduler.tick(None);
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            scheduler.process_next_outcome(),
        )
        .await;
        assert!(waited.is_err(), "cooldown must suppress the attempt");
    }

    #[tokio::test]
    async fn test_soft_force_defers_to_inbound_hard_does_not() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = Arc::new(PeerRegistry::new());
        let inbound = Arc::new(InboundTracker::new());
        let (mut scheduler, _handle) = Scheduler::new(
            SchedulerPolicy::default(),
            context(),
            Arc::clone(&registry),
            Arc::new(RefusingConnector),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&inbound),
            String::new(),
        );
        see_peer(&registry, "10.0.0.2:7000", 1_000_000);

        let _guard = inbound.begin(1_000_000);

        scheduler.tick(Some(Force::Soft));
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            scheduler.process_next_outcome(),
        )
        .await;
        assert!(waited.is_err(), "soft force must defer to inbound work");

        scheduler.tick(Some(Force::Hard));
        assert!(scheduler.process_next_outcome().await);
    }

    #[tokio::test]
    async fn test_history_pruned_when_peer_vanishes() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mut scheduler, registry) = scheduler(SchedulerPolicy::default(), Arc::clone(&clock));
        see_peer(&registry, "10.0.0.2:7000", 1_000_000);

        scheduler.tick(None);
        assert!(scheduler.process_next_outcome().await);
        assert_eq!(scheduler.tracked_peers(), 1);

        // Let the sighting go stale, then tick: the entry disappears.
        clock.advance(PEER_STALENESS_MS + 120_000);
        scheduler.tick(None);
        assert_eq!(scheduler.tracked_peers(), 0);
    }

    #[tokio::test]
    async fn test_random_exchange_picks_single_peer() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mut scheduler, registry) = scheduler(SchedulerPolicy::default(), Arc::clone(&clock));
        for i in 0..4 {
            see_peer(&registry, &format!("10.0.0.{i}:7000"), 1_000_000);
        }

        scheduler.tick(None);
        assert!(scheduler.process_next_outcome().await);
        let extra = tokio::time::timeout(
            Duration::from_millis(50),
            scheduler.process_next_outcome(),
        )
        .await;
        assert!(extra.is_err(), "random exchange launches one attempt per tick");
    }

    #[tokio::test]
    async fn test_hard_force_sweeps_all_peers() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mut scheduler, registry) = scheduler(SchedulerPolicy::default(), Arc::clone(&clock));
        for i in 0..3 {
            see_peer(&registry, &format!("10.0.0.{i}:7000"), 1_000_000);
        }

        scheduler.tick(Some(Force::Hard));
        for _ in 0..3 {
            assert!(scheduler.process_next_outcome().await);
        }
    }
}
