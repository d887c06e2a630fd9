//! The UDP endpoint: KRPC transport, the transaction table, and the
//! query responder.

mod endpoint;
mod token;

pub use endpoint::KrpcNode;
