//! Aggregation of transport discovery events into logical peers.
//!
//! A peer found on BLE and on LAN is one peer. Before the app-layer
//! handshake reveals its public-ID, a peer is keyed by a temporary
//! transport-derived id; the handshake renames the entry, merging any
//! transports already known under the public-ID.
//!
//! The state is two plain maps under one lock: the peer table and the
//! address index. Rename/merge is one logical atomic operation under that
//! lock. No back-references.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use drift_types::{TransportInfo, TransportKind};

use crate::{PeerError, Result};

/// A logical peer identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerId {
    /// Post-handshake: the peer's public identity (URL-safe base64).
    Public(String),
    /// Pre-handshake: derived from the transport that discovered it.
    Temp(TransportKind, String),
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerId::Public(id) => write!(f, "{id}"),
            PeerId::Temp(kind, addr) => write!(f, "temp:{kind}:{addr}"),
        }
    }
}

/// One logical peer with its per-transport reachability.
#[derive(Clone, Debug)]
pub struct UnifiedPeer {
    pub id: PeerId,
    /// At most one entry per transport kind.
    pub transports: HashMap<TransportKind, TransportInfo>,
}

impl UnifiedPeer {
    /// The highest-priority transport this peer is reachable on.
    pub fn best_transport(&self) -> Option<(TransportKind, &TransportInfo)> {
        self.transports
            .iter()
            .max_by_key(|(kind, _)| kind.priority())
            .map(|(kind, info)| (*kind, info))
    }

    /// Transports in descending priority order, for dial fallback.
    pub fn transports_by_priority(&self) -> Vec<(TransportKind, TransportInfo)> {
        let mut out: Vec<(TransportKind, TransportInfo)> = self
            .transports
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        out.sort_by_key(|(k, _)| std::cmp::Reverse(k.priority()));
        out
    }

    /// Strongest reported signal across transports.
    pub fn best_rssi(&self) -> Option<i32> {
        self.transports.values().filter_map(|t| t.rssi).max()
    }

    /// When any transport last saw this peer.
    pub fn last_seen_ms(&self) -> u64 {
        self.transports
            .values()
            .map(|t| t.last_seen_ms)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct Inner {
    peers: HashMap<PeerId, UnifiedPeer>,
    by_addr: HashMap<(TransportKind, String), PeerId>,
}

/// Thread-safe peer registry.
#[derive(Default)]
pub struct PeerRegistry {
    inner: Mutex<Inner>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| PeerError::Poisoned)
    }

    /// Record a discovery event: peer seen at `address` on `transport`.
    ///
    /// With no `extracted_id` the peer stays (or is created) under a
    /// temporary id. Passing an `extracted_id` (a transport that carries
    /// the public identity in its advertisement) renames/merges exactly
    /// like [`mark_handshake_complete`](Self::mark_handshake_complete).
    /// Reporting the same event twice yields the same state.
    pub fn report(
        &self,
        transport: TransportKind,
        address: &str,
        info: TransportInfo,
        extracted_id: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let key = (transport, address.to_string());
        let current_id = inner
            .by_addr
            .get(&key)
            .cloned()
            .unwrap_or(PeerId::Temp(transport, address.to_string()));

        upsert_transport(&mut inner, current_id.clone(), transport, address, info);

        if let Some(public) = extracted_id {
            merge_into_public(&mut inner, &current_id, public);
        }
        Ok(())
    }

    /// The app-layer handshake on `(transport, address)` revealed the
    /// peer's public identity: rename the entry, or merge it into an
    /// existing entry already known under that identity.
    pub fn mark_handshake_complete(
        &self,
        transport: TransportKind,
        address: &str,
        public_id: &str,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let key = (transport, address.to_string());
        let Some(current_id) = inner.by_addr.get(&key).cloned() else {
            tracing::debug!(%address, "handshake for unknown address ignored");
            return Ok(());
        };
        merge_into_public(&mut inner, &current_id, public_id);
        Ok(())
    }

    /// Drop transport entries not seen within `threshold_ms` of `now_ms`,
    /// and peers left with no transports.
    pub fn prune_stale(&self, threshold_ms: u64, now_ms: u64) -> Result<()> {
        let mut inner = self.lock()?;
        let cutoff = now_ms.saturating_sub(threshold_ms);

        let mut emptied = Vec::new();
        for (id, peer) in inner.peers.iter_mut() {
            peer.transports.retain(|_, info| info.last_seen_ms >= cutoff);
            if peer.transports.is_empty() {
                emptied.push(id.clone());
            }
        }
        for id in &emptied {
            inner.peers.remove(id);
            tracing::debug!(peer = %id, "stale peer pruned");
        }
        // Rebuild the address index from what survived: every value must
        // point at a live peer and a live transport entry.
        let rebuilt = index_of(&inner.peers);
        inner.by_addr = rebuilt;
        Ok(())
    }

    /// Peers with at least one transport seen within `threshold_ms`.
    pub fn reachable_peers(&self, threshold_ms: u64, now_ms: u64) -> Result<Vec<UnifiedPeer>> {
        let inner = self.lock()?;
        let cutoff = now_ms.saturating_sub(threshold_ms);
        Ok(inner
            .peers
            .values()
            .filter(|p| p.transports.values().any(|t| t.last_seen_ms >= cutoff))
            .cloned()
            .collect())
    }

    /// Every known peer, pre- and post-handshake.
    pub fn all_peers(&self) -> Result<Vec<UnifiedPeer>> {
        Ok(self.lock()?.peers.values().cloned().collect())
    }

    /// Look up which peer owns an address.
    pub fn peer_for_address(
        &self,
        transport: TransportKind,
        address: &str,
    ) -> Result<Option<PeerId>> {
        Ok(self
            .lock()?
            .by_addr
            .get(&(transport, address.to_string()))
            .cloned())
    }
}

/// Insert or refresh one transport entry under `id`.
fn upsert_transport(
    inner: &mut Inner,
    id: PeerId,
    transport: TransportKind,
    address: &str,
    info: TransportInfo,
) {
    let peer = inner.peers.entry(id.clone()).or_insert_with(|| UnifiedPeer {
        id: id.clone(),
        transports: HashMap::new(),
    });
    peer.transports.insert(transport, info);
    inner.by_addr.insert((transport, address.to_string()), id);
}

/// Rename `current_id` to the public identity, merging transport maps when
/// an entry for that identity already exists.
fn merge_into_public(inner: &mut Inner, current_id: &PeerId, public_id: &str) {
    let target = PeerId::Public(public_id.to_string());
    if *current_id == target {
        return;
    }
    let Some(old) = inner.peers.remove(current_id) else {
        return;
    };
    tracing::info!(from = %current_id, to = %target, "peer identified");

    let merged = inner.peers.entry(target.clone()).or_insert_with(|| UnifiedPeer {
        id: target.clone(),
        transports: HashMap::new(),
    });
    for (kind, info) in old.transports {
        // Prefer the fresher sighting when both entries know a transport.
        match merged.transports.get(&kind) {
            Some(existing) if existing.last_seen_ms >= info.last_seen_ms => {}
            _ => {
                merged.transports.insert(kind, info);
            }
        }
    }
    let addresses: Vec<(TransportKind, String)> = merged
        .transports
        .iter()
        .map(|(kind, info)| (*kind, info.address.clone()))
        .collect();
    for key in addresses {
        inner.by_addr.insert(key, target.clone());
    }
}

fn index_of(peers: &HashMap<PeerId, UnifiedPeer>) -> HashMap<(TransportKind, String), PeerId> {
    let mut index = HashMap::new();
    for (id, peer) in peers {
        for (kind, info) in &peer.transports {
            index.insert((*kind, info.address.clone()), id.clone());
        }
    }
    index
}
