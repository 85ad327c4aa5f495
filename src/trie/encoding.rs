//! RLP (Recursive Length Prefix) encoding and decoding.
//!
//! RLP is the canonical hash encoding: trie nodes and account records are
//! RLP-encoded before hashing, and stored node bytes are RLP-decoded when a
//! hash reference is resolved from the backing store.

use thiserror::Error;

/// RLP decode errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RlpError {
    /// The input ended inside an item.
    #[error("truncated rlp input")]
    Truncated,
    /// The input contains bytes past the decoded item.
    #[error("trailing bytes after rlp item")]
    Trailing,
    /// An item does not have the expected shape.
    #[error("unexpected rlp item: {0}")]
    Unexpected(&'static str),
}

/// RLP encoder for building RLP-encoded data.
#[derive(Clone, Debug, Default)]
pub struct RlpEncoder {
    buffer: Vec<u8>,
}

impl RlpEncoder {
    /// Creates a new empty encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Clears the encoder for reuse.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Encodes a byte slice as a string.
    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() == 1 && bytes[0] < 0x80 {
            self.buffer.push(bytes[0]);
        } else if bytes.len() < 56 {
            self.buffer.push(0x80 + bytes.len() as u8);
            self.buffer.extend_from_slice(bytes);
        } else {
            let len_bytes = Self::encode_length(bytes.len());
            self.buffer.push(0xb7 + len_bytes.len() as u8);
            self.buffer.extend_from_slice(&len_bytes);
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Encodes an empty string.
    pub fn encode_empty(&mut self) {
        self.buffer.push(0x80);
    }

    /// Appends an already-encoded item verbatim.
    ///
    /// Used to embed an inline child node (itself a complete RLP list)
    /// inside its parent's encoding.
    pub fn encode_raw(&mut self, raw: &[u8]) {
        self.buffer.extend_from_slice(raw);
    }

    /// Encodes a u64 value.
    pub fn encode_u64(&mut self, value: u64) {
        if value == 0 {
            self.buffer.push(0x80);
        } else if value < 0x80 {
            self.buffer.push(value as u8);
        } else {
            let bytes = value.to_be_bytes();
            let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
            self.encode_bytes(&bytes[first..]);
        }
    }

    /// Encodes a list of items.
    pub fn encode_list<F>(&mut self, encode_items: F)
    where
        F: FnOnce(&mut Self),
    {
        let start = self.start_list();
        encode_items(self);
        self.finish_list(start);
    }

    /// Starts encoding a list. Reserves one header byte and returns its
    /// position; `finish_list` patches it once the payload length is known.
    fn start_list(&mut self) -> usize {
        let pos = self.buffer.len();
        self.buffer.push(0);
        pos
    }

    /// Finishes encoding a list started at the given position.
    fn finish_list(&mut self, start_pos: usize) {
        let content_len = self.buffer.len() - start_pos - 1;

        if content_len < 56 {
            self.buffer[start_pos] = 0xc0 + content_len as u8;
        } else {
            // Long payload takes a multi-byte header; shift the payload
            // right to open up the room.
            let len_bytes = Self::encode_length(content_len);
            let header_len = 1 + len_bytes.len();
            let extra = header_len - 1;
            let old_len = self.buffer.len();
            self.buffer.resize(old_len + extra, 0);
            self.buffer
                .copy_within(start_pos + 1..old_len, start_pos + header_len);

            self.buffer[start_pos] = 0xf7 + len_bytes.len() as u8;
            self.buffer[start_pos + 1..start_pos + header_len].copy_from_slice(&len_bytes);
        }
    }

    /// Encodes the length as big-endian bytes without leading zeros.
    fn encode_length(len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut n = len;

        if n == 0 {
            return vec![0];
        }

        while n > 0 {
            bytes.push((n & 0xff) as u8);
            n >>= 8;
        }

        bytes.reverse();
        bytes
    }
}

/// A decoded RLP item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RlpItem<'a> {
    /// A byte string.
    Bytes(&'a [u8]),
    /// A list of items, with the raw bytes of the whole list kept alongside
    /// (needed to re-embed or hash an inline child without re-encoding).
    List(Vec<RlpItem<'a>>, &'a [u8]),
}

impl<'a> RlpItem<'a> {
    /// Returns the byte string, or an error for lists.
    pub(crate) fn as_bytes(&self) -> Result<&'a [u8], RlpError> {
        match self {
            RlpItem::Bytes(b) => Ok(b),
            RlpItem::List(..) => Err(RlpError::Unexpected("expected bytes, found list")),
        }
    }

    /// Decodes a u64 from a big-endian byte string item.
    pub(crate) fn as_u64(&self) -> Result<u64, RlpError> {
        let bytes = self.as_bytes()?;
        if bytes.len() > 8 {
            return Err(RlpError::Unexpected("integer too large for u64"));
        }
        let mut value = 0u64;
        for b in bytes {
            value = (value << 8) | *b as u64;
        }
        Ok(value)
    }
}

/// Decodes a single RLP item, requiring the input to be fully consumed.
pub(crate) fn decode_item(data: &[u8]) -> Result<RlpItem<'_>, RlpError> {
    let (item, rest) = parse_item(data)?;
    if !rest.is_empty() {
        return Err(RlpError::Trailing);
    }
    Ok(item)
}

/// Parses one item off the front of the input, returning the remainder.
fn parse_item(data: &[u8]) -> Result<(RlpItem<'_>, &[u8]), RlpError> {
    let prefix = *data.first().ok_or(RlpError::Truncated)?;

    if prefix < 0x80 {
        // Single byte, encodes itself
        return Ok((RlpItem::Bytes(&data[..1]), &data[1..]));
    }

    if prefix <= 0xbf {
        // Byte string
        let (header_len, content_len) = parse_length(data, 0x80, 0xb7)?;
        let end = header_len + content_len;
        if data.len() < end {
            return Err(RlpError::Truncated);
        }
        return Ok((RlpItem::Bytes(&data[header_len..end]), &data[end..]));
    }

    // List
    let (header_len, content_len) = parse_length(data, 0xc0, 0xf7)?;
    let end = header_len + content_len;
    if data.len() < end {
        return Err(RlpError::Truncated);
    }
    let raw = &data[..end];
    let mut content = &data[header_len..end];
    let mut items = Vec::new();
    while !content.is_empty() {
        let (item, rest) = parse_item(content)?;
        items.push(item);
        content = rest;
    }
    Ok((RlpItem::List(items, raw), &data[end..]))
}

/// Parses a short/long length header for the given prefix bases.
fn parse_length(data: &[u8], short_base: u8, long_base: u8) -> Result<(usize, usize), RlpError> {
    let prefix = data[0];
    if prefix <= long_base {
        Ok((1, (prefix - short_base) as usize))
    } else {
        let len_of_len = (prefix - long_base) as usize;
        if data.len() < 1 + len_of_len {
            return Err(RlpError::Truncated);
        }
        let mut len = 0usize;
        for b in &data[1..1 + len_of_len] {
            len = (len << 8) | *b as usize;
        }
        Ok((1 + len_of_len, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty() {
        let mut enc = RlpEncoder::new();
        enc.encode_empty();
        assert_eq!(enc.as_bytes(), &[0x80]);
    }

    #[test]
    fn test_encode_short_string() {
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(b"dog");
        assert_eq!(enc.as_bytes(), &[0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_encode_short_list() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_bytes(b"cat");
            e.encode_bytes(b"dog");
        });
        assert_eq!(
            enc.as_bytes(),
            &[0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_encode_u64() {
        let mut enc = RlpEncoder::new();
        enc.encode_u64(0);
        assert_eq!(enc.as_bytes(), &[0x80]);

        enc.clear();
        enc.encode_u64(127);
        assert_eq!(enc.as_bytes(), &[127]);

        enc.clear();
        enc.encode_u64(256);
        assert_eq!(enc.as_bytes(), &[0x82, 0x01, 0x00]);

        // Values past 32 bits keep every byte.
        enc.clear();
        enc.encode_u64(0x0102_0304_0506);
        assert_eq!(enc.as_bytes(), &[0x86, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        enc.clear();
        enc.encode_u64(u64::MAX);
        assert_eq!(
            enc.as_bytes(),
            &[0x88, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_encode_long_string() {
        let data = vec![0xAAu8; 60];
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(&data);
        assert_eq!(enc.as_bytes()[0], 0xb8);
        assert_eq!(enc.as_bytes()[1], 60);
        assert_eq!(&enc.as_bytes()[2..], &data[..]);
    }

    #[test]
    fn test_encode_long_list() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            for _ in 0..20 {
                e.encode_bytes(b"dog");
            }
        });
        // 20 * 4 = 80 bytes of content -> long list header
        assert_eq!(enc.as_bytes()[0], 0xf8);
        assert_eq!(enc.as_bytes()[1], 80);
    }

    #[test]
    fn test_decode_bytes() {
        assert_eq!(decode_item(&[0x83, b'd', b'o', b'g']).unwrap(), RlpItem::Bytes(b"dog"));
        assert_eq!(decode_item(&[0x7f]).unwrap(), RlpItem::Bytes(&[0x7f]));
        assert_eq!(decode_item(&[0x80]).unwrap(), RlpItem::Bytes(&[]));
    }

    #[test]
    fn test_decode_list() {
        let data = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        match decode_item(&data).unwrap() {
            RlpItem::List(items, raw) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], RlpItem::Bytes(b"cat"));
                assert_eq!(items[1], RlpItem::Bytes(b"dog"));
                assert_eq!(raw, &data[..]);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_roundtrip() {
        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_u64(42);
            e.encode_bytes(&[0xFF; 40]);
            e.encode_empty();
        });
        let encoded = enc.into_bytes();

        match decode_item(&encoded).unwrap() {
            RlpItem::List(items, _) => {
                assert_eq!(items[0].as_u64().unwrap(), 42);
                assert_eq!(items[1].as_bytes().unwrap(), &[0xFF; 40]);
                assert_eq!(items[2].as_bytes().unwrap(), &[]);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode_item(&[0x83, b'd']), Err(RlpError::Truncated));
        assert_eq!(decode_item(&[]), Err(RlpError::Truncated));
    }

    #[test]
    fn test_decode_trailing() {
        assert_eq!(decode_item(&[0x80, 0x80]), Err(RlpError::Trailing));
    }
}
