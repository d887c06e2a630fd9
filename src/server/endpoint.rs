use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::token::TokenKeeper;
use crate::config::DhtConfig;
use crate::krpc::{error_code, KrpcError, KrpcMessage, QueryKind, ResponseBody, TransactionId};
use crate::lookup::{IterationError, IterativeLookup, PeerLookup};
use crate::node::{InfoHash, NodeId, NodeInfo};
use crate::routing::{QueryOutcome, RoutingTable};
use crate::rpc::{GetPeersReply, RpcError, RpcGateway};
use crate::store::{MemoryPeerStore, PeerSourceStore};

const RECV_BUFFER_LEN: usize = 65535;
const MAX_PENDING_QUERIES: usize = 1024;
const SECRET_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct PendingQuery {
    sender: mpsc::Sender<KrpcMessage>,
}

/// Clears a transaction out of the pending map once its query is over.
///
/// Dropping is the one path that always runs: a lookup that hits the
/// query deadline is cancelled wholesale, mid-await, and never reaches
/// any code after `recv`.
struct PendingGuard<'a> {
    node: &'a KrpcNode,
    tid: TransactionId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.node.pending.write().remove(&self.tid);
    }
}

/// A DHT node: one UDP socket, a routing table, and the machinery to both
/// query the overlay and answer for it.
///
/// The node is handed out in an [`Arc`] so lookups can hold it across
/// await points. Run [`KrpcNode::run`] on its own task to service the
/// socket, then query through [`KrpcNode::lookup_nodes`],
/// [`KrpcNode::lookup_peers`] and [`KrpcNode::announce`].
///
/// # Examples
///
/// ```no_run
/// use rdht::{DhtConfig, KrpcNode, NodeId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let node = KrpcNode::bind(DhtConfig::default()).await?;
/// let runner = node.clone();
/// tokio::spawn(async move { runner.run().await });
///
/// let found = node.lookup_peers(NodeId::random()).await?;
/// println!("found {} peers", found.peers.len());
/// # Ok(())
/// # }
/// ```
pub struct KrpcNode {
    socket: Arc<UdpSocket>,
    our_id: NodeId,
    config: DhtConfig,
    table: Arc<RoutingTable>,
    store: Arc<dyn PeerSourceStore>,
    pending: RwLock<HashMap<TransactionId, PendingQuery>>,
    tokens: RwLock<TokenKeeper>,
    port: u16,
}

impl KrpcNode {
    /// Binds a UDP socket on `config.dht_port` under a fresh random id,
    /// backed by an in-memory peer store.
    pub async fn bind(config: DhtConfig) -> Result<Arc<Self>, RpcError> {
        let store = Arc::new(MemoryPeerStore::new(config.peer_timeout));
        Self::bind_with(config, NodeId::random(), store).await
    }

    /// Binds under a caller-chosen id and peer store. The id variant lets
    /// a node keep its identity across restarts.
    pub async fn bind_with(
        config: DhtConfig,
        our_id: NodeId,
        store: Arc<dyn PeerSourceStore>,
    ) -> Result<Arc<Self>, RpcError> {
        let socket = UdpSocket::bind(("0.0.0.0", config.dht_port)).await?;
        let local_addr = socket.local_addr()?;

        info!("dht node {} listening on {}", our_id, local_addr);

        let table = Arc::new(RoutingTable::new(our_id, &config));
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            our_id,
            table,
            store,
            pending: RwLock::new(HashMap::new()),
            tokens: RwLock::new(TokenKeeper::new()),
            port: local_addr.port(),
            config,
        }))
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn node_count(&self) -> usize {
        self.table.node_count()
    }

    #[cfg(test)]
    pub(super) fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Services the socket until it fails: inbound datagrams, the
    /// maintenance sweep, and token secret rotation.
    pub async fn run(&self) -> Result<(), RpcError> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut nice = interval(self.config.nice_interval);
        let mut rotation = interval(SECRET_ROTATION_INTERVAL);
        nice.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Skip);
        nice.tick().await;
        rotation.tick().await;

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    match KrpcMessage::parse(&buf[..len]) {
                        Ok(message) => self.dispatch(message, from).await,
                        Err(KrpcError::UnknownMethod { tid, method }) => {
                            debug!("unknown method {:?} from {}", method, from);
                            let wire = KrpcMessage::error(
                                tid,
                                error_code::METHOD_UNKNOWN,
                                "Method Unknown",
                            )
                            .encode();
                            let _ = self.socket.send_to(&wire, from).await;
                        }
                        Err(err) => debug!("undecodable datagram from {}: {}", from, err),
                    }
                }
                _ = nice.tick() => {
                    let now = Instant::now();
                    self.table.sweep(now);
                    self.store.purge_expired(now);
                }
                _ = rotation.tick() => {
                    self.tokens.write().rotate();
                    debug!("announce token secret rotated");
                }
            }
        }
    }

    async fn dispatch(&self, message: KrpcMessage, from: SocketAddr) {
        // any well-formed message is proof its sender is alive
        if let Some(id) = message.sender() {
            self.table.observe(NodeInfo::new(id, from), QueryOutcome::Success);
        }

        match message {
            KrpcMessage::Query { tid, kind, .. } => self.answer(tid, kind, from).await,
            reply => {
                let pending = self.pending.read();
                match pending.get(reply.tid()) {
                    Some(query) => {
                        let _ = query.sender.try_send(reply);
                    }
                    None => debug!("reply from {} with unknown transaction", from),
                }
            }
        }
    }

    async fn answer(&self, tid: TransactionId, kind: QueryKind, from: SocketAddr) {
        let reply = match kind {
            QueryKind::Ping => KrpcMessage::response(tid, ResponseBody::new(self.our_id)),
            QueryKind::FindNode { target } => {
                let mut body = ResponseBody::new(self.our_id);
                // an exact hit answers by itself
                body.nodes = match self.table.get(&target) {
                    Some(known) => vec![known],
                    None => self.table.find_closest(&target, self.config.k),
                };
                KrpcMessage::response(tid, body)
            }
            QueryKind::GetPeers { info_hash } => {
                let mut body = ResponseBody::new(self.our_id);
                body.token = Some(self.tokens.read().issue(&from));
                let peers = self.store.get(&info_hash);
                if peers.is_empty() {
                    body.nodes = self.table.find_closest(&info_hash, self.config.k);
                } else {
                    body.peers = peers;
                }
                KrpcMessage::response(tid, body)
            }
            QueryKind::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                if self.tokens.read().check(&from, &token) {
                    let peer_port = if implied_port { from.port() } else { port };
                    self.store.add(info_hash, SocketAddr::new(from.ip(), peer_port));
                    debug!("stored announced peer {}:{} for {}", from.ip(), peer_port, info_hash);
                    KrpcMessage::response(tid, ResponseBody::new(self.our_id))
                } else {
                    debug!("rejecting announce from {}, invalid token", from);
                    KrpcMessage::error(tid, error_code::PROTOCOL, "Invalid token")
                }
            }
        };

        let wire = reply.encode();
        if let Err(err) = self.socket.send_to(&wire, from).await {
            warn!("failed to answer {}: {}", from, err);
        }
    }

    async fn send_query(
        &self,
        addr: SocketAddr,
        kind: QueryKind,
    ) -> Result<ResponseBody, RpcError> {
        let (tx, mut rx) = mpsc::channel(1);
        let tid = self.register_query(tx)?;
        let _guard = PendingGuard {
            node: self,
            tid: tid.clone(),
        };

        let wire = KrpcMessage::query(tid, self.our_id, kind).encode();
        self.socket.send_to(&wire, addr).await?;

        match timeout(self.config.rpc_timeout, rx.recv()).await {
            Ok(Some(KrpcMessage::Response { body, .. })) => Ok(body),
            Ok(Some(KrpcMessage::Error { code, message, .. })) => {
                Err(RpcError::Remote { code, message })
            }
            // queries are never delivered to a pending slot
            Ok(Some(KrpcMessage::Query { .. })) | Ok(None) | Err(_) => Err(RpcError::Timeout),
        }
    }

    fn register_query(&self, sender: mpsc::Sender<KrpcMessage>) -> Result<TransactionId, RpcError> {
        let mut pending = self.pending.write();
        if pending.len() >= MAX_PENDING_QUERIES {
            return Err(RpcError::Backlogged);
        }
        // 4 random bytes; re-roll the rare collision with an in-flight query
        let tid = loop {
            let candidate = Bytes::copy_from_slice(&rand::random::<[u8; 4]>());
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.insert(tid.clone(), PendingQuery { sender });
        Ok(tid)
    }

    fn lookup(self: &Arc<Self>) -> IterativeLookup<KrpcNode> {
        IterativeLookup::new(Arc::clone(self), Arc::clone(&self.table), &self.config)
    }

    /// Walks the overlay toward `target` and returns the closest nodes
    /// found, bounded by the overall query deadline.
    pub async fn lookup_nodes(
        self: &Arc<Self>,
        target: NodeId,
    ) -> Result<Vec<NodeInfo>, IterationError> {
        let lookup = self.lookup();
        match timeout(self.config.query_timeout, lookup.find_node(target, Vec::new())).await {
            Ok(result) => result,
            Err(_) => Err(IterationError::Deadline),
        }
    }

    /// Searches the overlay for peers on `info_hash`, bounded by the
    /// overall query deadline.
    pub async fn lookup_peers(
        self: &Arc<Self>,
        info_hash: InfoHash,
    ) -> Result<PeerLookup, IterationError> {
        let lookup = self.lookup();
        match timeout(
            self.config.query_timeout,
            lookup.find_peers(info_hash, Vec::new()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IterationError::Deadline),
        }
    }

    /// Registers this process as a peer for `info_hash` on the closest
    /// nodes that handed out announce tokens; `port` is where our side
    /// accepts peer connections. Returns how many nodes accepted.
    pub async fn announce(
        self: &Arc<Self>,
        info_hash: InfoHash,
        port: u16,
    ) -> Result<usize, IterationError> {
        let found = self.lookup_peers(info_hash).await?;
        let mut targets = found.tokens;
        targets.sort_by(|a, b| {
            a.0.id.distance(&info_hash).cmp(&b.0.id.distance(&info_hash))
        });
        targets.truncate(self.config.k);

        let sends = join_all(targets.into_iter().map(|(node, token)| async move {
            let outcome = self.announce_peer(node.addr, info_hash, token, port).await;
            (node, outcome)
        }))
        .await;

        let mut accepted = 0;
        for (node, outcome) in sends {
            match outcome {
                Ok(()) => accepted += 1,
                Err(err) => debug!("announce to {} not accepted: {}", node.addr, err),
            }
        }
        info!("announced {} to {} nodes", info_hash, accepted);
        Ok(accepted)
    }
}

#[async_trait]
impl RpcGateway for KrpcNode {
    async fn ping(&self, addr: SocketAddr) -> Result<NodeInfo, RpcError> {
        let body = self.send_query(addr, QueryKind::Ping).await?;
        Ok(NodeInfo::new(body.id, addr))
    }

    async fn find_node(
        &self,
        addr: SocketAddr,
        target: NodeId,
    ) -> Result<Vec<NodeInfo>, RpcError> {
        let body = self.send_query(addr, QueryKind::FindNode { target }).await?;
        Ok(body.nodes)
    }

    async fn get_peers(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
    ) -> Result<GetPeersReply, RpcError> {
        let body = self.send_query(addr, QueryKind::GetPeers { info_hash }).await?;
        Ok(GetPeersReply {
            token: body.token,
            peers: body.peers,
            nodes: body.nodes,
        })
    }

    async fn announce_peer(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
        token: Bytes,
        port: u16,
    ) -> Result<(), RpcError> {
        self.send_query(
            addr,
            QueryKind::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port: false,
            },
        )
        .await?;
        Ok(())
    }
}
