use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

// DHT packets nest two or three levels deep; anything past this is garbage
// or an attack on the stack.
const MAX_DEPTH: usize = 64;

/// Decodes exactly one bencode value spanning the whole input.
///
/// Trailing bytes after the value are an error; use [`decode_prefix`] when
/// the framing allows a surplus.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Decodes one bencode value from the front of the input and returns it
/// together with the number of bytes consumed.
///
/// The `ut_metadata` data message is framed as `<bencoded dict><raw piece
/// bytes>`; the caller takes `&data[consumed..]` as the piece payload.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value(0)?;
    Ok((value, parser.pos))
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let digits = self.take_until(b'e')?;
        self.pos += 1;

        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;
        if text.is_empty() || text == "-" {
            return Err(BencodeError::InvalidInteger);
        }
        // i-0e, i03e and friends are not canonical bencode.
        if text.starts_with("-0") || (text.len() > 1 && text.starts_with('0')) {
            return Err(BencodeError::InvalidInteger);
        }

        text.parse()
            .map(Value::Integer)
            .map_err(|_| BencodeError::InvalidInteger)
    }

    fn bytes(&mut self) -> Result<Bytes, BencodeError> {
        let digits = self.take_until(b':')?;
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidLength)?;
        self.pos += 1;

        if self.data.len() - self.pos < len {
            return Err(BencodeError::UnexpectedEof);
        }

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::InvalidKey);
            }
            let key = self.bytes()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn take_until(&mut self, delim: u8) -> Result<&'a [u8], BencodeError> {
        let start = self.pos;
        while self.peek()? != delim {
            self.pos += 1;
        }
        Ok(&self.data[start..self.pos])
    }
}
