//! Storage for announced peers, the "who has what" side of the DHT.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::node::InfoHash;

/// Ceiling on stored endpoints per info-hash. Popular torrents would
/// otherwise grow without bound on nodes near their hash.
const MAX_PEERS_PER_HASH: usize = 1000;

/// Where announced peers live. The endpoint consults this for `get_peers`
/// and writes to it on `announce_peer`; the owner decides the backing
/// (the in-memory store here, or something persistent).
pub trait PeerSourceStore: Send + Sync {
    /// Current peers for `info_hash`, empty if nobody announced.
    fn get(&self, info_hash: &InfoHash) -> Vec<SocketAddr>;

    /// Records one announced endpoint. Announcing again refreshes the
    /// entry's lifetime, it never duplicates.
    fn add(&self, info_hash: InfoHash, peer: SocketAddr);

    /// Drops announcements older than the peer lifetime, as of `now`.
    fn purge_expired(&self, now: Instant);
}

struct Announced {
    addr: SocketAddr,
    announced_at: Instant,
}

/// In-memory [`PeerSourceStore`] with a per-announcement lifetime.
pub struct MemoryPeerStore {
    peer_timeout: Duration,
    entries: RwLock<HashMap<InfoHash, Vec<Announced>>>,
}

impl MemoryPeerStore {
    pub fn new(peer_timeout: Duration) -> Self {
        Self {
            peer_timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of info-hashes currently holding at least one peer.
    pub fn hash_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl PeerSourceStore for MemoryPeerStore {
    fn get(&self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        self.entries
            .read()
            .get(info_hash)
            .map(|peers| peers.iter().map(|entry| entry.addr).collect())
            .unwrap_or_default()
    }

    fn add(&self, info_hash: InfoHash, peer: SocketAddr) {
        let mut entries = self.entries.write();
        let peers = entries.entry(info_hash).or_default();
        if let Some(existing) = peers.iter_mut().find(|entry| entry.addr == peer) {
            existing.announced_at = Instant::now();
            return;
        }
        if peers.len() < MAX_PEERS_PER_HASH {
            peers.push(Announced {
                addr: peer,
                announced_at: Instant::now(),
            });
        }
    }

    fn purge_expired(&self, now: Instant) {
        let mut entries = self.entries.write();
        entries.retain(|_, peers| {
            peers.retain(|entry| {
                now.duration_since(entry.announced_at) <= self.peer_timeout
            });
            !peers.is_empty()
        });
    }
}
