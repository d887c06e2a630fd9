//! Outbound RPC seams.
//!
//! The lookup engine and join controller talk to the network through the
//! [`RpcGateway`] and [`Resolver`] traits rather than a socket, so tests can
//! drive them with scripted implementations. The production implementation
//! of [`RpcGateway`] is [`crate::server::KrpcNode`].

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::krpc::KrpcError;
use crate::node::{InfoHash, NodeId, NodeInfo};
use crate::routing::QueryOutcome;

/// Failure of a single outbound RPC. These are transient: callers account
/// the failure against the queried node and move on.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("query timed out")]
    Timeout,
    /// The remote answered with a KRPC error message.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("malformed reply: {0}")]
    Malformed(#[from] KrpcError),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Too many queries already in flight on this endpoint.
    #[error("query backlog full")]
    Backlogged,
}

impl RpcError {
    /// How this failure is charged against the queried node, if at all.
    /// Local faults (socket errors, backlog) say nothing about the remote.
    pub fn outcome(&self) -> Option<QueryOutcome> {
        match self {
            RpcError::Timeout => Some(QueryOutcome::Timeout),
            RpcError::Remote { .. } | RpcError::Malformed(_) => Some(QueryOutcome::ProtocolError),
            RpcError::Io(_) | RpcError::Backlogged => None,
        }
    }
}

/// What a `get_peers` query yielded: an announce token, and either peers
/// for the info-hash or closer nodes to keep walking toward.
#[derive(Debug, Clone, Default)]
pub struct GetPeersReply {
    pub token: Option<Bytes>,
    pub peers: Vec<SocketAddr>,
    pub nodes: Vec<NodeInfo>,
}

/// The four queries of the protocol, addressed to a single remote node.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Pings `addr`, returning the verified contact on success.
    async fn ping(&self, addr: SocketAddr) -> Result<NodeInfo, RpcError>;

    /// Asks `addr` for the nodes it knows closest to `target`.
    async fn find_node(&self, addr: SocketAddr, target: NodeId)
        -> Result<Vec<NodeInfo>, RpcError>;

    /// Asks `addr` for peers on `info_hash`, or failing that, closer nodes.
    async fn get_peers(&self, addr: SocketAddr, info_hash: InfoHash)
        -> Result<GetPeersReply, RpcError>;

    /// Registers us as a peer for `info_hash` at `addr`, presenting the
    /// token that node handed out earlier.
    async fn announce_peer(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
        token: Bytes,
        port: u16,
    ) -> Result<(), RpcError>;
}

/// Turns a bootstrap hostname into socket addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// System DNS through the runtime's resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}
