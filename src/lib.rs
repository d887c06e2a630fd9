//! rdht - a mainline DHT node
//!
//! This library implements a node in the BitTorrent mainline DHT (BEP-5):
//! Kademlia-style routing over the KRPC UDP protocol. A node joins the
//! overlay through well-known bootstrap hosts, keeps a routing table of
//! the nodes it has exchanged traffic with, resolves the nodes and peers
//! closest to any 160-bit identifier, and answers the same four queries
//! for everyone else.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding, as KRPC uses it
//! - [`krpc`] - KRPC message parsing/encoding and the compact codecs
//! - [`node`] - identifiers, XOR distance, and contact bookkeeping
//! - [`routing`] - the bucketed routing table
//! - [`lookup`] - the iterative fan-out/merge lookup engine
//! - [`join`] - bootstrap and steady-state presence broadcasting
//! - [`server`] - the UDP endpoint tying all of it together
//! - [`store`] - announced-peer storage
//! - [`rpc`] - the gateway/resolver seams between the above
//! - [`config`] - runtime knobs

pub mod bencode;
pub mod config;
pub mod join;
pub mod krpc;
pub mod lookup;
pub mod node;
pub mod routing;
pub mod rpc;
pub mod server;
pub mod store;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::DhtConfig;
pub use join::{JoinController, JoinError, JoinState};
pub use krpc::{KrpcError, KrpcMessage, QueryKind, ResponseBody, TransactionId};
pub use lookup::{IterationError, IterativeLookup, PeerLookup};
pub use node::{Distance, InfoHash, NodeId, NodeInfo, ID_BITS};
pub use routing::{QueryOutcome, RoutingTable};
pub use rpc::{DnsResolver, GetPeersReply, Resolver, RpcError, RpcGateway};
pub use server::KrpcNode;
pub use store::{MemoryPeerStore, PeerSourceStore};

#[cfg(test)]
pub(crate) mod testutil;
