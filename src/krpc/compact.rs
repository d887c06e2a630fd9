use crate::node::{NodeId, NodeInfo};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const COMPACT_NODE_LEN: usize = 26;
pub const COMPACT_PEER_LEN: usize = 6;

/// Parses a concatenated run of 26-byte compact node entries.
///
/// A trailing partial entry is dropped rather than failing the whole field;
/// responders in the wild occasionally truncate.
pub fn parse_nodes(data: &[u8]) -> Vec<NodeInfo> {
    data.chunks_exact(COMPACT_NODE_LEN)
        .filter_map(|chunk| {
            let id = NodeId::try_from_bytes(&chunk[..20])?;
            let addr = parse_peer(&chunk[20..])?;
            Some(NodeInfo::new(id, addr))
        })
        .collect()
}

/// Encodes contacts into the compact `nodes` form.
///
/// The compact format is IPv4 only; contacts at IPv6 addresses are skipped.
pub fn encode_nodes(nodes: &[NodeInfo]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * COMPACT_NODE_LEN);
    for node in nodes {
        if let SocketAddr::V4(v4) = node.addr {
            out.extend_from_slice(node.id.as_bytes());
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    out
}

/// Parses one 6-byte compact peer entry (4-byte IPv4 + 2-byte port).
pub fn parse_peer(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != COMPACT_PEER_LEN {
        return None;
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

pub fn encode_peer(addr: &SocketAddr) -> Option<[u8; COMPACT_PEER_LEN]> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut out = [0u8; COMPACT_PEER_LEN];
            out[..4].copy_from_slice(&v4.ip().octets());
            out[4..].copy_from_slice(&v4.port().to_be_bytes());
            Some(out)
        }
        SocketAddr::V6(_) => None,
    }
}
