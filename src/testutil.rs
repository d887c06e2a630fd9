//! Scripted network stand-ins for driving the lookup engine and join
//! controller without sockets.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::node::{InfoHash, NodeId, NodeInfo};
use crate::rpc::{GetPeersReply, Resolver, RpcError, RpcGateway};

pub fn id_with(first: u8) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[0] = first;
    NodeId(bytes)
}

pub fn addr(tail: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, tail)), port)
}

pub fn contact(first: u8, port: u16) -> NodeInfo {
    NodeInfo::new(id_with(first), addr(first, port))
}

/// How one scripted address behaves. Anything never scripted times out.
struct Script {
    id: NodeId,
    nodes: Vec<NodeInfo>,
    peers: Vec<SocketAddr>,
    token: Option<Bytes>,
    /// Answer pings but time out on every other query.
    mute_queries: bool,
}

impl Script {
    fn for_node(node: &NodeInfo) -> Self {
        Self {
            id: node.id,
            nodes: Vec::new(),
            peers: Vec::new(),
            token: None,
            mute_queries: false,
        }
    }
}

/// [`RpcGateway`] answering from a per-address script, with a call log.
#[derive(Default)]
pub struct StubGateway {
    scripts: Mutex<HashMap<SocketAddr, Script>>,
    log: Mutex<Vec<(SocketAddr, &'static str)>>,
}

impl StubGateway {
    fn with_script(&self, node: &NodeInfo, set: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock();
        set(scripts.entry(node.addr).or_insert_with(|| Script::for_node(node)));
    }

    /// Scripts `node` to answer everything with an empty payload.
    pub fn alive(&self, node: &NodeInfo) {
        self.with_script(node, |_| {});
    }

    /// Scripts `node` to hand out `nodes` from find_node and get_peers.
    pub fn returns_nodes(&self, node: &NodeInfo, nodes: Vec<NodeInfo>) {
        self.with_script(node, |script| script.nodes = nodes);
    }

    /// Scripts `node` to hand out `peers` (and `token`) from get_peers.
    pub fn returns_peers(&self, node: &NodeInfo, peers: Vec<SocketAddr>, token: Option<Bytes>) {
        self.with_script(node, |script| {
            script.peers = peers;
            script.token = token;
        });
    }

    pub fn set_nodes(&self, node: &NodeInfo, nodes: Vec<NodeInfo>) {
        self.returns_nodes(node, nodes);
    }

    pub fn set_token(&self, node: &NodeInfo, token: Option<Bytes>) {
        self.with_script(node, |script| script.token = token);
    }

    /// Scripts `node` to answer pings but drop every other query.
    pub fn mute_queries(&self, node: &NodeInfo) {
        self.with_script(node, |script| script.mute_queries = true);
    }

    fn record(&self, addr: SocketAddr, method: &'static str) {
        self.log.lock().push((addr, method));
    }

    /// Total queries of any kind sent to `addr`.
    pub fn calls_to(&self, addr: SocketAddr) -> usize {
        self.log.lock().iter().filter(|(a, _)| *a == addr).count()
    }

    /// Queries of one kind sent to `addr`.
    pub fn calls(&self, addr: SocketAddr, method: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(a, m)| *a == addr && *m == method)
            .count()
    }
}

#[async_trait]
impl RpcGateway for StubGateway {
    async fn ping(&self, addr: SocketAddr) -> Result<NodeInfo, RpcError> {
        self.record(addr, "ping");
        let scripts = self.scripts.lock();
        match scripts.get(&addr) {
            Some(script) => Ok(NodeInfo::new(script.id, addr)),
            None => Err(RpcError::Timeout),
        }
    }

    async fn find_node(
        &self,
        addr: SocketAddr,
        _target: NodeId,
    ) -> Result<Vec<NodeInfo>, RpcError> {
        self.record(addr, "find_node");
        let scripts = self.scripts.lock();
        match scripts.get(&addr) {
            Some(script) if !script.mute_queries => Ok(script.nodes.clone()),
            _ => Err(RpcError::Timeout),
        }
    }

    async fn get_peers(
        &self,
        addr: SocketAddr,
        _info_hash: InfoHash,
    ) -> Result<GetPeersReply, RpcError> {
        self.record(addr, "get_peers");
        let scripts = self.scripts.lock();
        match scripts.get(&addr) {
            Some(script) if !script.mute_queries => Ok(GetPeersReply {
                token: script.token.clone(),
                peers: script.peers.clone(),
                nodes: script.nodes.clone(),
            }),
            _ => Err(RpcError::Timeout),
        }
    }

    async fn announce_peer(
        &self,
        addr: SocketAddr,
        _info_hash: InfoHash,
        _token: Bytes,
        _port: u16,
    ) -> Result<(), RpcError> {
        self.record(addr, "announce_peer");
        let scripts = self.scripts.lock();
        match scripts.get(&addr) {
            Some(script) if !script.mute_queries => Ok(()),
            _ => Err(RpcError::Timeout),
        }
    }
}

/// [`Resolver`] answering from a fixed host table, optionally failing the
/// first few calls to exercise retry paths.
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<SocketAddr>>,
    failures_left: Mutex<u32>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        self.hosts.insert(host.to_string(), addrs);
        self
    }

    /// The next `n` resolve calls fail before the table is consulted.
    pub fn failing_first(self, n: u32) -> Self {
        *self.failures_left.lock() = n;
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "resolver offline"));
            }
        }
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")))
    }
}
