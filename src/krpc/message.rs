use super::compact;
use super::error::KrpcError;
use crate::bencode::{decode, encode, Value};
use crate::node::{InfoHash, NodeId, NodeInfo};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddr;

pub type TransactionId = Bytes;

/// KRPC error codes defined by BEP-5.
pub mod error_code {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: InfoHash,
    },
    AnnouncePeer {
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
}

impl QueryKind {
    pub fn method(&self) -> &'static str {
        match self {
            QueryKind::Ping => "ping",
            QueryKind::FindNode { .. } => "find_node",
            QueryKind::GetPeers { .. } => "get_peers",
            QueryKind::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// Payload of a KRPC response.
///
/// Which fields are populated depends on the query being answered: a ping
/// reply carries only the id, a find_node reply carries nodes, a get_peers
/// reply carries a token plus either peers or nodes.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub id: NodeId,
    pub nodes: Vec<NodeInfo>,
    pub peers: Vec<SocketAddr>,
    pub token: Option<Bytes>,
}

impl ResponseBody {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            peers: Vec::new(),
            token: None,
        }
    }
}

/// One KRPC datagram: a query, a response, or an error reply.
#[derive(Debug, Clone)]
pub enum KrpcMessage {
    Query {
        tid: TransactionId,
        id: NodeId,
        kind: QueryKind,
    },
    Response {
        tid: TransactionId,
        body: ResponseBody,
    },
    Error {
        tid: TransactionId,
        code: i64,
        message: String,
    },
}

fn key(k: &'static str) -> Bytes {
    Bytes::from_static(k.as_bytes())
}

fn id_value(id: &NodeId) -> Value {
    Value::bytes(id.as_bytes())
}

impl KrpcMessage {
    pub fn query(tid: TransactionId, id: NodeId, kind: QueryKind) -> Self {
        KrpcMessage::Query { tid, id, kind }
    }

    pub fn response(tid: TransactionId, body: ResponseBody) -> Self {
        KrpcMessage::Response { tid, body }
    }

    pub fn error(tid: TransactionId, code: i64, message: impl Into<String>) -> Self {
        KrpcMessage::Error {
            tid,
            code,
            message: message.into(),
        }
    }

    pub fn tid(&self) -> &TransactionId {
        match self {
            KrpcMessage::Query { tid, .. }
            | KrpcMessage::Response { tid, .. }
            | KrpcMessage::Error { tid, .. } => tid,
        }
    }

    /// The id of the node that sent this message. Error replies carry none.
    pub fn sender(&self) -> Option<NodeId> {
        match self {
            KrpcMessage::Query { id, .. } => Some(*id),
            KrpcMessage::Response { body, .. } => Some(body.id),
            KrpcMessage::Error { .. } => None,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, KrpcError> {
        let root = decode(data)?.into_dict().ok_or(KrpcError::NotADict)?;

        let tid = root
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or(KrpcError::MissingField("t"))?;

        let msg_type = root
            .get(b"y".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(KrpcError::MissingField("y"))?;

        match msg_type {
            "q" => parse_query(tid, &root),
            "r" => parse_response(tid, &root),
            "e" => parse_error(tid, &root),
            other => Err(KrpcError::UnknownType(other.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut root = BTreeMap::new();
        root.insert(key("t"), Value::Bytes(self.tid().clone()));

        match self {
            KrpcMessage::Query { id, kind, .. } => {
                root.insert(key("y"), "q".into());
                root.insert(key("q"), kind.method().into());

                let mut args = BTreeMap::new();
                args.insert(key("id"), id_value(id));
                match kind {
                    QueryKind::Ping => {}
                    QueryKind::FindNode { target } => {
                        args.insert(key("target"), id_value(target));
                    }
                    QueryKind::GetPeers { info_hash } => {
                        args.insert(key("info_hash"), id_value(info_hash));
                    }
                    QueryKind::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    } => {
                        args.insert(key("info_hash"), id_value(info_hash));
                        args.insert(key("port"), Value::Int(*port as i64));
                        args.insert(key("token"), Value::Bytes(token.clone()));
                        if *implied_port {
                            args.insert(key("implied_port"), Value::Int(1));
                        }
                    }
                }
                root.insert(key("a"), Value::Dict(args));
            }
            KrpcMessage::Response { body, .. } => {
                root.insert(key("y"), "r".into());

                let mut r = BTreeMap::new();
                r.insert(key("id"), id_value(&body.id));
                if !body.nodes.is_empty() {
                    r.insert(
                        key("nodes"),
                        Value::Bytes(compact::encode_nodes(&body.nodes).into()),
                    );
                }
                if !body.peers.is_empty() {
                    let values = body
                        .peers
                        .iter()
                        .filter_map(compact::encode_peer)
                        .map(|p| Value::bytes(p))
                        .collect();
                    r.insert(key("values"), Value::List(values));
                }
                if let Some(token) = &body.token {
                    r.insert(key("token"), Value::Bytes(token.clone()));
                }
                root.insert(key("r"), Value::Dict(r));
            }
            KrpcMessage::Error { code, message, .. } => {
                root.insert(key("y"), "e".into());
                root.insert(
                    key("e"),
                    Value::List(vec![Value::Int(*code), Value::bytes(message)]),
                );
            }
        }

        encode(&Value::Dict(root))
    }
}

fn parse_id(dict: &BTreeMap<Bytes, Value>) -> Result<NodeId, KrpcError> {
    let bytes = dict
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .ok_or(KrpcError::MissingField("id"))?;
    NodeId::try_from_bytes(bytes).ok_or(KrpcError::BadId)
}

fn parse_query(tid: TransactionId, root: &BTreeMap<Bytes, Value>) -> Result<KrpcMessage, KrpcError> {
    let method = root
        .get(b"q".as_slice())
        .and_then(|v| v.as_str())
        .ok_or(KrpcError::MissingField("q"))?;

    let args = root
        .get(b"a".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or(KrpcError::MissingField("a"))?;

    let id = parse_id(args)?;

    let kind = match method {
        "ping" => QueryKind::Ping,
        "find_node" => {
            let target = args
                .get(b"target".as_slice())
                .and_then(|v| v.as_bytes())
                .ok_or(KrpcError::MissingField("target"))?;
            QueryKind::FindNode {
                target: NodeId::try_from_bytes(target).ok_or(KrpcError::BadId)?,
            }
        }
        "get_peers" => {
            let info_hash = args
                .get(b"info_hash".as_slice())
                .and_then(|v| v.as_bytes())
                .ok_or(KrpcError::MissingField("info_hash"))?;
            QueryKind::GetPeers {
                info_hash: NodeId::try_from_bytes(info_hash).ok_or(KrpcError::BadId)?,
            }
        }
        "announce_peer" => {
            let info_hash = args
                .get(b"info_hash".as_slice())
                .and_then(|v| v.as_bytes())
                .ok_or(KrpcError::MissingField("info_hash"))?;
            let port = args
                .get(b"port".as_slice())
                .and_then(|v| v.as_int())
                .ok_or(KrpcError::MissingField("port"))?;
            let token = args
                .get(b"token".as_slice())
                .and_then(|v| v.as_bytes())
                .cloned()
                .ok_or(KrpcError::MissingField("token"))?;
            let implied_port = args
                .get(b"implied_port".as_slice())
                .and_then(|v| v.as_int())
                .map(|v| v == 1)
                .unwrap_or(false);
            QueryKind::AnnouncePeer {
                info_hash: NodeId::try_from_bytes(info_hash).ok_or(KrpcError::BadId)?,
                port: port as u16,
                token,
                implied_port,
            }
        }
        other => {
            return Err(KrpcError::UnknownMethod {
                tid,
                method: other.to_string(),
            })
        }
    };

    Ok(KrpcMessage::Query { tid, id, kind })
}

fn parse_response(
    tid: TransactionId,
    root: &BTreeMap<Bytes, Value>,
) -> Result<KrpcMessage, KrpcError> {
    let r = root
        .get(b"r".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or(KrpcError::MissingField("r"))?;

    let mut body = ResponseBody::new(parse_id(r)?);

    if let Some(data) = r.get(b"nodes".as_slice()).and_then(|v| v.as_bytes()) {
        body.nodes = compact::parse_nodes(data);
    }

    if let Some(values) = r.get(b"values".as_slice()).and_then(|v| v.as_list()) {
        body.peers = values
            .iter()
            .filter_map(|v| v.as_bytes())
            .filter_map(|b| compact::parse_peer(b))
            .collect();
    }

    body.token = r
        .get(b"token".as_slice())
        .and_then(|v| v.as_bytes())
        .cloned();

    Ok(KrpcMessage::Response { tid, body })
}

fn parse_error(tid: TransactionId, root: &BTreeMap<Bytes, Value>) -> Result<KrpcMessage, KrpcError> {
    let list = root
        .get(b"e".as_slice())
        .and_then(|v| v.as_list())
        .ok_or(KrpcError::MissingField("e"))?;

    let code = list
        .first()
        .and_then(|v| v.as_int())
        .ok_or(KrpcError::MissingField("e"))?;

    // some implementations omit the text; the code alone is still usable
    let message = list.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();

    Ok(KrpcMessage::Error { tid, code, message })
}
