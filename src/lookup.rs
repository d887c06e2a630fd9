//! Iterative lookups, the read side of the overlay.
//!
//! A lookup fans a round of queries out to the closest nodes it knows of,
//! folds every reply back in, and goes again until fresh rounds stop
//! getting closer to the target. One engine drives both `find_node` walks
//! and `get_peers` searches; the latter also collects peers and the
//! announce token each responder hands out.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tracing::debug;

use crate::config::DhtConfig;
use crate::node::{Distance, InfoHash, NodeId, NodeInfo};
use crate::routing::{QueryOutcome, RoutingTable};
use crate::rpc::RpcGateway;

/// A lookup that could not run to completion. Individual query failures
/// are absorbed into routing-table accounting and never surface here.
#[derive(Debug, Error)]
pub enum IterationError {
    /// Neither the caller nor the routing table had anywhere to start.
    #[error("no seed nodes")]
    NoSeeds,

    /// A whole round went unanswered.
    #[error("all outbound queries timed out")]
    AllQueriesFailed,

    /// The lookup ran past the overall query deadline.
    #[error("query deadline exceeded")]
    Deadline,
}

/// What a peers search produced: the peers themselves, the closest nodes
/// that answered, and the announce tokens collected along the way.
#[derive(Debug, Default)]
pub struct PeerLookup {
    pub peers: Vec<SocketAddr>,
    pub nodes: Vec<NodeInfo>,
    pub tokens: Vec<(NodeInfo, Bytes)>,
}

/// Transient state of one lookup, dropped when it finishes.
struct LookupState {
    target: NodeId,
    queried: HashSet<NodeId>,
    alive: HashMap<NodeId, NodeInfo>,
    frontier: Vec<NodeInfo>,
    rounds: u32,
    no_improvement: u32,
    best_seen: Distance,
}

impl LookupState {
    /// Admits a node to the alive set and folds its distance into the
    /// running minimum, which only ever decreases.
    fn track(&mut self, node: NodeInfo) {
        let distance = node.id.distance(&self.target);
        if distance < self.best_seen {
            self.best_seen = distance;
        }
        self.alive.insert(node.id, node);
    }
}

/// One reply, normalized across the two query flavors.
struct RoundReply {
    nodes: Vec<NodeInfo>,
    peers: Vec<SocketAddr>,
    token: Option<Bytes>,
}

/// The fan-out/merge engine.
///
/// Convergence: a round makes progress only when its new frontier holds a
/// node strictly closer than everything seen in earlier rounds. After
/// `search_retries` rounds without progress, or once the frontier empties,
/// the lookup settles on the closest alive nodes.
pub struct IterativeLookup<G: ?Sized> {
    gateway: Arc<G>,
    table: Arc<RoutingTable>,
    width: usize,
    retries: u32,
}

impl<G> IterativeLookup<G>
where
    G: RpcGateway + ?Sized,
{
    pub fn new(gateway: Arc<G>, table: Arc<RoutingTable>, config: &DhtConfig) -> Self {
        Self {
            gateway,
            table,
            width: config.search_width,
            retries: config.search_retries,
        }
    }

    /// Walks the overlay toward `target` and returns the closest nodes
    /// found. A non-empty `seeds` overrides the routing table as the
    /// starting set.
    pub async fn find_node(
        &self,
        target: NodeId,
        seeds: Vec<NodeInfo>,
    ) -> Result<Vec<NodeInfo>, IterationError> {
        let mut state = self.seed(target, seeds)?;
        while self.advance(&mut state, None).await? {}
        Ok(self.closest_alive(&state))
    }

    /// Searches out peers for `info_hash`, collecting an announce token
    /// from every node that answered along the way.
    pub async fn find_peers(
        &self,
        info_hash: InfoHash,
        seeds: Vec<NodeInfo>,
    ) -> Result<PeerLookup, IterationError> {
        let mut state = self.seed(info_hash, seeds)?;
        let mut found = PeerLookup::default();
        while self.advance(&mut state, Some(&mut found)).await? {}
        found.nodes = self.closest_alive(&state);
        Ok(found)
    }

    fn seed(&self, target: NodeId, seeds: Vec<NodeInfo>) -> Result<LookupState, IterationError> {
        let frontier = if seeds.is_empty() {
            self.table.find_closest(&target, self.width)
        } else {
            seeds
        };
        if frontier.is_empty() {
            return Err(IterationError::NoSeeds);
        }
        Ok(LookupState {
            target,
            queried: HashSet::new(),
            alive: HashMap::new(),
            frontier,
            rounds: 0,
            no_improvement: 0,
            best_seen: Distance::MAX,
        })
    }

    /// Runs one round. `Ok(true)` means keep going, `Ok(false)` means the
    /// lookup has settled.
    async fn advance(
        &self,
        state: &mut LookupState,
        mut peers_out: Option<&mut PeerLookup>,
    ) -> Result<bool, IterationError> {
        let batch: Vec<NodeInfo> = state
            .frontier
            .drain(..)
            .filter(|node| !state.queried.contains(&node.id))
            .collect();
        if batch.is_empty() {
            return Ok(false);
        }

        state.rounds += 1;
        for node in &batch {
            state.queried.insert(node.id);
        }
        debug!(
            "lookup round {} toward {} querying {} nodes",
            state.rounds,
            state.target,
            batch.len()
        );

        // the merge below must not start until every query of the round
        // has resolved one way or the other
        let wants_peers = peers_out.is_some();
        let gateway = &self.gateway;
        let target = state.target;
        let replies = join_all(batch.iter().map(|node| {
            let addr = node.addr;
            async move {
                if wants_peers {
                    gateway.get_peers(addr, target).await.map(|reply| RoundReply {
                        nodes: reply.nodes,
                        peers: reply.peers,
                        token: reply.token,
                    })
                } else {
                    gateway.find_node(addr, target).await.map(|nodes| RoundReply {
                        nodes,
                        peers: Vec::new(),
                        token: None,
                    })
                }
            }
        }))
        .await;

        let previous_best = state.best_seen;
        let mut any_success = false;
        let mut fresh: HashSet<NodeId> = HashSet::new();
        let mut discovered: Vec<NodeInfo> = Vec::new();

        for (node, result) in batch.into_iter().zip(replies) {
            match result {
                Ok(reply) => {
                    any_success = true;

                    if let Some(found) = peers_out.as_deref_mut() {
                        if let Some(token) = reply.token {
                            found.tokens.push((node.clone(), token));
                        }
                        for peer in &reply.peers {
                            if !found.peers.contains(peer) {
                                found.peers.push(*peer);
                            }
                        }
                    }

                    // a responder that has actual peers is done walking;
                    // its nodes field is not merged
                    let authoritative = !reply.peers.is_empty();
                    self.table.observe(node.clone(), QueryOutcome::Success);
                    state.track(node);
                    if authoritative {
                        continue;
                    }

                    for rumored in reply.nodes {
                        if rumored.id == *self.table.our_id()
                            || state.queried.contains(&rumored.id)
                            || !fresh.insert(rumored.id)
                        {
                            continue;
                        }
                        self.table.observe(rumored.clone(), QueryOutcome::Success);
                        state.track(rumored.clone());
                        discovered.push(rumored);
                    }
                }
                Err(err) => {
                    debug!("query to {} failed during lookup: {}", node.addr, err);
                    if let Some(outcome) = err.outcome() {
                        self.table.observe(node, outcome);
                    }
                }
            }
        }

        if !any_success {
            return Err(IterationError::AllQueriesFailed);
        }

        discovered.sort_by(|a, b| {
            a.id.distance(&state.target).cmp(&b.id.distance(&state.target))
        });
        discovered.truncate(self.width);

        let improved = discovered
            .first()
            .map(|node| node.id.distance(&state.target) < previous_best)
            .unwrap_or(false);
        if improved {
            state.no_improvement = 0;
        } else {
            state.no_improvement += 1;
        }
        state.frontier = discovered;

        if state.frontier.is_empty() || state.no_improvement >= self.retries {
            debug!(
                "lookup toward {} settled after {} rounds, {} nodes alive",
                state.target,
                state.rounds,
                state.alive.len()
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn closest_alive(&self, state: &LookupState) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = state.alive.values().cloned().collect();
        nodes.sort_by(|a, b| {
            a.id.distance(&state.target).cmp(&b.id.distance(&state.target))
        });
        nodes.truncate(self.width);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{contact, id_with, StubGateway};

    fn target() -> NodeId {
        NodeId([0u8; 20])
    }

    fn table() -> Arc<RoutingTable> {
        Arc::new(RoutingTable::new(id_with(0xf0), &DhtConfig::default()))
    }

    fn engine(gateway: &Arc<StubGateway>, table: &Arc<RoutingTable>) -> IterativeLookup<StubGateway> {
        IterativeLookup::new(Arc::clone(gateway), Arc::clone(table), &DhtConfig::default())
    }

    #[tokio::test]
    async fn test_no_seeds_and_empty_table_errors() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let result = engine(&gateway, &table).find_node(target(), Vec::new()).await;
        assert!(matches!(result, Err(IterationError::NoSeeds)));
    }

    #[tokio::test]
    async fn test_all_queries_failing_errors() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        // seed is never scripted, so every query to it times out
        let seed = contact(0x40, 7000);
        let result = engine(&gateway, &table).find_node(target(), vec![seed]).await;
        assert!(matches!(result, Err(IterationError::AllQueriesFailed)));
    }

    #[tokio::test]
    async fn test_chain_walks_to_target() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let p1 = contact(0x40, 7001);
        let p2 = contact(0x10, 7002);
        let p3 = contact(0x01, 7003);
        gateway.returns_nodes(&p1, vec![p2.clone()]);
        gateway.returns_nodes(&p2, vec![p3.clone()]);
        gateway.alive(&p3);

        let found = engine(&gateway, &table)
            .find_node(target(), vec![p1.clone()])
            .await
            .unwrap();

        assert_eq!(found[0].id, p3.id);
        assert_eq!(found.len(), 3);
        // each hop queried exactly once
        assert_eq!(gateway.calls_to(p1.addr), 1);
        assert_eq!(gateway.calls_to(p2.addr), 1);
        assert_eq!(gateway.calls_to(p3.addr), 1);
        // every responder landed in the routing table
        assert!(table.get(&p1.id).is_some());
        assert!(table.get(&p3.id).is_some());
    }

    #[tokio::test]
    async fn test_self_referential_seed_converges_in_one_round() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let seed = contact(0x40, 7010);
        // the seed only ever reports itself, so no round can discover
        // anything new
        gateway.returns_nodes(&seed, vec![seed.clone()]);

        let found = engine(&gateway, &table)
            .find_node(target(), vec![seed.clone()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(gateway.calls_to(seed.addr), 1);
    }

    #[tokio::test]
    async fn test_settles_after_rounds_without_progress() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        // the seed is closest; every later discovery is farther out, so
        // no round after the first counts as progress
        let seed = contact(0x02, 7100);
        let far: Vec<_> = (0..5).map(|i| contact(0x21 + i, 7101 + i as u16)).collect();
        gateway.returns_nodes(&seed, vec![far[0].clone()]);
        for i in 0..4 {
            gateway.returns_nodes(&far[i], vec![far[i + 1].clone()]);
        }

        let found = engine(&gateway, &table)
            .find_node(target(), vec![seed.clone()])
            .await
            .unwrap();

        assert_eq!(found[0].id, seed.id);
        // search_retries (4) stale rounds after the seed round, then stop:
        // the fifth discovery exists but is never queried
        assert_eq!(gateway.calls_to(far[3].addr), 1);
        assert_eq!(gateway.calls_to(far[4].addr), 0);
    }

    #[tokio::test]
    async fn test_improving_rounds_reset_the_stall_counter() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        // strictly improving chain longer than search_retries: the lookup
        // must follow it all the way down
        let hops: Vec<_> = [0x7f, 0x3f, 0x1f, 0x0f, 0x07, 0x03, 0x01]
            .iter()
            .enumerate()
            .map(|(i, b)| contact(*b, 7200 + i as u16))
            .collect();
        for pair in hops.windows(2) {
            gateway.returns_nodes(&pair[0], vec![pair[1].clone()]);
        }
        gateway.alive(&hops[hops.len() - 1]);

        let found = engine(&gateway, &table)
            .find_node(target(), vec![hops[0].clone()])
            .await
            .unwrap();

        assert_eq!(found[0].id, hops[hops.len() - 1].id);
        for hop in &hops {
            assert_eq!(gateway.calls_to(hop.addr), 1);
        }
    }

    #[tokio::test]
    async fn test_seeds_pulled_from_table_when_none_given() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let known = contact(0x20, 7300);
        table.observe(known.clone(), QueryOutcome::Success);
        gateway.alive(&known);

        let found = engine(&gateway, &table)
            .find_node(target(), Vec::new())
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(gateway.calls_to(known.addr), 1);
    }

    #[tokio::test]
    async fn test_failed_responder_is_charged_in_table() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let good = contact(0x20, 7400);
        let bad = contact(0x21, 7401);
        table.observe(good.clone(), QueryOutcome::Success);
        table.observe(bad.clone(), QueryOutcome::Success);
        gateway.alive(&good);
        // bad stays unscripted and times out

        engine(&gateway, &table)
            .find_node(target(), Vec::new())
            .await
            .unwrap();

        assert_eq!(table.get(&bad.id).unwrap().fail_count, 1);
        assert_eq!(table.get(&good.id).unwrap().fail_count, 0);
    }

    #[tokio::test]
    async fn test_peer_search_collects_peers_and_tokens() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let holder = contact(0x30, 7500);
        let walker = contact(0x31, 7501);
        let next = contact(0x06, 7502);
        let ignored = contact(0x05, 7503);
        let peer: SocketAddr = "9.9.9.9:9999".parse().unwrap();

        // holder has peers; the nodes it also lists must not be walked
        gateway.returns_peers(&holder, vec![peer], Some(Bytes::from_static(b"tok-h")));
        gateway.set_nodes(&holder, vec![ignored.clone()]);
        gateway.returns_nodes(&walker, vec![next.clone()]);
        gateway.set_token(&walker, Some(Bytes::from_static(b"tok-w")));
        gateway.alive(&next);

        let found = engine(&gateway, &table)
            .find_peers(target(), vec![holder.clone(), walker.clone()])
            .await
            .unwrap();

        assert_eq!(found.peers, vec![peer]);
        assert_eq!(gateway.calls_to(ignored.addr), 0);
        assert_eq!(gateway.calls_to(next.addr), 1);

        let token_holders: Vec<NodeId> = found.tokens.iter().map(|(n, _)| n.id).collect();
        assert!(token_holders.contains(&holder.id));
        assert!(token_holders.contains(&walker.id));
        // closest responder first in the node list
        assert_eq!(found.nodes[0].id, next.id);
    }
}
