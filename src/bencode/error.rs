use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("input truncated")]
    Truncated,

    #[error("malformed integer")]
    BadInt,

    #[error("malformed string length")]
    BadLength,

    #[error("dictionary key is not a byte string")]
    BadKey,

    #[error("unexpected byte {0:#04x}")]
    UnexpectedByte(u8),

    #[error("trailing bytes after document")]
    TrailingData,

    #[error("nesting too deep")]
    TooDeep,
}
