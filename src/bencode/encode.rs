use super::value::Value;

/// Encodes a value into its canonical bencode form.
///
/// Dictionary keys come out in lexicographic order (the [`Value::Dict`]
/// map already keeps them sorted), so encoding the same value always
/// produces the same bytes. Encoding cannot fail.
///
/// # Examples
///
/// ```
/// use rdht::bencode::{encode, Value};
/// use bytes::Bytes;
/// use std::collections::BTreeMap;
///
/// assert_eq!(encode(&Value::Int(42)), b"i42e");
/// assert_eq!(encode(&Value::bytes("ping")), b"4:ping");
///
/// let mut dict = BTreeMap::new();
/// dict.insert(Bytes::from_static(b"y"), Value::bytes("q"));
/// dict.insert(Bytes::from_static(b"t"), Value::bytes("aa"));
/// assert_eq!(encode(&Value::Dict(dict)), b"d1:t2:aa1:y1:qe");
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => write_byte_string(b, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                write_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, val) in entries {
                write_byte_string(key, out);
                write_value(val, out);
            }
            out.push(b'e');
        }
    }
}

fn write_byte_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
