use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 32;

/// Decodes a complete bencode document.
///
/// The entire input must form exactly one value; leftover bytes are an
/// error. This is what a UDP transport wants, since a datagram carries
/// exactly one message.
///
/// # Examples
///
/// ```
/// use rdht::bencode::decode;
///
/// let value = decode(b"li1ei2ei3ee").unwrap();
/// assert_eq!(value.as_list().map(|l| l.len()), Some(3));
///
/// assert!(decode(b"i42e junk").is_err());
/// ```
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut cursor = Cursor { input, pos: 0 };
    let value = cursor.value(0)?;

    if cursor.pos != input.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input.get(self.pos).copied().ok_or(BencodeError::Truncated)
    }

    fn advance(&mut self) -> Result<u8, BencodeError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, byte: u8) -> Result<(), BencodeError> {
        if self.advance()? != byte {
            return Err(BencodeError::UnexpectedByte(self.input[self.pos - 1]));
        }
        Ok(())
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.expect(b'i')?;

        let negative = self.peek()? == b'-';
        if negative {
            self.pos += 1;
        }

        let digits_start = self.pos;
        let mut value: i64 = 0;
        while self.peek()? != b'e' {
            let byte = self.advance()?;
            if !byte.is_ascii_digit() {
                return Err(BencodeError::BadInt);
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((byte - b'0') as i64))
                .ok_or(BencodeError::BadInt)?;
        }

        let digits = self.pos - digits_start;
        if digits == 0 {
            return Err(BencodeError::BadInt);
        }
        // "i-0e" and zero-padded forms like "i03e" are not canonical
        if self.input[digits_start] == b'0' && (digits > 1 || negative) {
            return Err(BencodeError::BadInt);
        }

        self.expect(b'e')?;
        Ok(Value::Int(if negative { -value } else { value }))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let mut len: usize = 0;
        loop {
            let byte = self.advance()?;
            if byte == b':' {
                break;
            }
            if !byte.is_ascii_digit() {
                return Err(BencodeError::BadLength);
            }
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add((byte - b'0') as usize))
                .ok_or(BencodeError::BadLength)?;
        }

        let end = self.pos.checked_add(len).ok_or(BencodeError::BadLength)?;
        if end > self.input.len() {
            return Err(BencodeError::Truncated);
        }

        let bytes = Bytes::copy_from_slice(&self.input[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.expect(b'l')?;
        let mut items = Vec::new();

        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.expect(b'd')?;
        let mut entries = BTreeMap::new();

        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::BadKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }

        self.pos += 1;
        Ok(Value::Dict(entries))
    }
}
