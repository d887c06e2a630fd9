use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KrpcError {
    #[error("bencode: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("message is not a dictionary")]
    NotADict,

    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("invalid node id")]
    BadId,

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// The transaction id is kept so the endpoint can still answer the
    /// querier with a 204 error.
    #[error("unknown query method {method:?}")]
    UnknownMethod { tid: Bytes, method: String },
}
