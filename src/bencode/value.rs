use bytes::Bytes;
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// KRPC only ever puts a dictionary at the top level, but fields inside it
/// can be any of the four bencode types.
///
/// # Examples
///
/// ```
/// use rdht::bencode::Value;
///
/// let port: Value = 6881i64.into();
/// assert_eq!(port.as_int(), Some(6881));
///
/// let name: Value = "find_node".into();
/// assert_eq!(name.as_str(), Some("find_node"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Int(i64),
    /// A byte string, not necessarily UTF-8.
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys, kept sorted for canonical encoding.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Builds a byte string value from anything byte-like.
    pub fn bytes(data: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Bytes::copy_from_slice(data.as_ref()))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The value as UTF-8 text, when it is a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Consumes the value, yielding the dictionary when it is one.
    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Dictionary lookup; `None` when the value is not a dictionary or the
    /// key is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdht::bencode::decode;
    ///
    /// let value = decode(b"d1:y1:qe").unwrap();
    /// assert_eq!(value.get(b"y").and_then(|v| v.as_str()), Some("q"));
    /// assert_eq!(value.get(b"t"), None);
    /// ```
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::bytes(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}
