//! KRPC message layer ([BEP-5]).
//!
//! KRPC is a simple RPC scheme: each UDP datagram carries one bencoded
//! dictionary that is either a query, a response, or an error, correlated
//! by an opaque transaction id. This module converts between datagrams and
//! [`KrpcMessage`] values, including the compact node and peer encodings
//! used in `nodes` and `values` fields.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod compact;
mod error;
mod message;

pub use compact::{encode_nodes, encode_peer, parse_nodes, parse_peer};
pub use error::KrpcError;
pub use message::{error_code, KrpcMessage, QueryKind, ResponseBody, TransactionId};
