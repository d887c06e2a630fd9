//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format underneath KRPC: every DHT message on
//! the wire is a single bencoded dictionary. The format has four data types:
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:ping` → "ping" |
//! | List | `l<items>e` | `li1ei2ee` → [1, 2] |
//! | Dictionary | `d<key><value>...e` | `d1:qi7ee` → {"q": 7} |
//!
//! Decoding is strict: trailing bytes, malformed integers, and over-deep
//! nesting are rejected rather than silently tolerated, so a datagram either
//! parses completely or not at all. Encoding is canonical (dictionary keys in
//! lexicographic order) and cannot fail.
//!
//! # Examples
//!
//! ```
//! use rdht::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d1:ad2:id3:abce1:q4:ping1:t2:aa1:y1:qe").unwrap();
//! assert_eq!(value.get(b"q").and_then(|v| v.as_str()), Some("ping"));
//!
//! let round = encode(&value);
//! assert_eq!(round, b"d1:ad2:id3:abce1:q4:ping1:t2:aa1:y1:qe");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
