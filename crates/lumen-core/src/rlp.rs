//! Recursive Length Prefix codec.
//!
//! Decoding is strict: anything accepted here re-encodes to exactly the
//! bytes it was decoded from. Callers rely on that to hash a decoded item
//! (block headers, trie nodes) by encoding it again.

use alloy_primitives::U256;
use thiserror::Error;

/// Maximum list nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

const STRING_OFFSET: u8 = 0x80;
const LONG_STRING_OFFSET: u8 = 0xb7;
const LIST_OFFSET: u8 = 0xc0;
const LONG_LIST_OFFSET: u8 = 0xf7;
const SHORT_PAYLOAD_LIMIT: usize = 56;

/// Errors produced while decoding RLP or interpreting a decoded item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RlpError {
    #[error("Unexpected end of input: need {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("Length prefix starts with a zero byte")]
    LeadingZeroLength,

    #[error("Length {length} encoded in long form, short form required")]
    NonCanonicalLength { length: usize },

    #[error("Single byte 0x{byte:02x} must be encoded as itself")]
    NonCanonicalSingleByte { byte: u8 },

    #[error("Length prefix does not fit in memory")]
    LengthOverflow,

    #[error("{count} trailing bytes after the top-level item")]
    TrailingBytes { count: usize },

    #[error("Nesting exceeds {max} levels")]
    TooDeep { max: usize },

    #[error("Expected a byte string, found a list")]
    ExpectedBytes,

    #[error("Expected a list, found a byte string")]
    ExpectedList,

    #[error("Integer of {len} bytes does not fit in {bits} bits")]
    IntegerOverflow { len: usize, bits: u32 },

    #[error("Expected {expected} bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("List has {actual} elements, element {index} requested")]
    MissingElement { index: usize, actual: usize },

    #[error("Byte string is not valid UTF-8")]
    InvalidUtf8,
}

/// A decoded RLP value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn is_list(&self) -> bool {
        matches!(self, RlpItem::List(_))
    }

    pub fn as_bytes(&self) -> Result<&[u8], RlpError> {
        match self {
            RlpItem::Bytes(bytes) => Ok(bytes),
            RlpItem::List(_) => Err(RlpError::ExpectedBytes),
        }
    }

    pub fn as_list(&self) -> Result<&[RlpItem], RlpError> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(RlpError::ExpectedList),
        }
    }

    /// Element `index` of a list item.
    pub fn element(&self, index: usize) -> Result<&RlpItem, RlpError> {
        let items = self.as_list()?;
        items.get(index).ok_or(RlpError::MissingElement {
            index,
            actual: items.len(),
        })
    }

    /// Big-endian unsigned integer. An empty string is zero.
    pub fn as_u64(&self) -> Result<u64, RlpError> {
        let bytes = self.as_bytes()?;
        if bytes.len() > 8 {
            return Err(RlpError::IntegerOverflow {
                len: bytes.len(),
                bits: 64,
            });
        }
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn as_u256(&self) -> Result<U256, RlpError> {
        let bytes = self.as_bytes()?;
        U256::try_from_be_slice(bytes).ok_or(RlpError::IntegerOverflow {
            len: bytes.len(),
            bits: 256,
        })
    }

    pub fn as_bool(&self) -> Result<bool, RlpError> {
        Ok(self.as_u64()? != 0)
    }

    /// A byte string of exactly `N` bytes.
    pub fn as_fixed<const N: usize>(&self) -> Result<[u8; N], RlpError> {
        let bytes = self.as_bytes()?;
        if bytes.len() != N {
            return Err(RlpError::InvalidLength {
                expected: N,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn as_str(&self) -> Result<&str, RlpError> {
        std::str::from_utf8(self.as_bytes()?).map_err(|_| RlpError::InvalidUtf8)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            RlpItem::Bytes(bytes) => encode_bytes(bytes),
            RlpItem::List(items) => {
                let encoded: Vec<Vec<u8>> = items.iter().map(RlpItem::encode).collect();
                encode_list(&encoded)
            }
        }
    }
}

// --- Encoding ---

fn encode_length(len: usize, offset: u8) -> Vec<u8> {
    if len < SHORT_PAYLOAD_LIMIT {
        vec![offset + len as u8]
    } else {
        let len_bytes = trim_leading_zeros(&(len as u64).to_be_bytes()).to_vec();
        let mut out = Vec::with_capacity(1 + len_bytes.len());
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < STRING_OFFSET {
        return vec![bytes[0]];
    }
    let mut out = encode_length(bytes.len(), STRING_OFFSET);
    out.extend_from_slice(bytes);
    out
}

pub fn encode_str(value: &str) -> Vec<u8> {
    encode_bytes(value.as_bytes())
}

/// Minimal big-endian encoding; zero is the empty string.
pub fn encode_u64(value: u64) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

pub fn encode_u256(value: &U256) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&value.to_be_bytes::<32>()))
}

/// Encode a big-endian integer given as raw bytes, dropping leading zeros.
pub fn encode_uint_bytes(value: &[u8]) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(value))
}

/// Wrap already-encoded children in a list prefix.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = encode_length(payload_len, LIST_OFFSET);
    out.reserve(payload_len);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

// --- Decoding ---

struct Header {
    list: bool,
    offset: usize,
    len: usize,
}

fn read_long_length(data: &[u8], len_of_len: usize) -> Result<usize, RlpError> {
    let available = data.len().saturating_sub(1);
    if available < len_of_len {
        return Err(RlpError::UnexpectedEnd {
            needed: len_of_len,
            available,
        });
    }
    let len_bytes = &data[1..1 + len_of_len];
    if len_bytes[0] == 0 {
        return Err(RlpError::LeadingZeroLength);
    }
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(RlpError::LengthOverflow);
    }
    let len = len_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    if len < SHORT_PAYLOAD_LIMIT {
        return Err(RlpError::NonCanonicalLength { length: len });
    }
    Ok(len)
}

fn decode_header(data: &[u8]) -> Result<Header, RlpError> {
    let prefix = *data.first().ok_or(RlpError::UnexpectedEnd {
        needed: 1,
        available: 0,
    })?;

    let header = match prefix {
        0x00..=0x7f => Header {
            list: false,
            offset: 0,
            len: 1,
        },
        0x80..=0xb7 => {
            let len = usize::from(prefix - STRING_OFFSET);
            if len == 1 {
                if let Some(&byte) = data.get(1) {
                    if byte < STRING_OFFSET {
                        return Err(RlpError::NonCanonicalSingleByte { byte });
                    }
                }
            }
            Header {
                list: false,
                offset: 1,
                len,
            }
        }
        0xb8..=0xbf => {
            let len_of_len = usize::from(prefix - LONG_STRING_OFFSET);
            Header {
                list: false,
                offset: 1 + len_of_len,
                len: read_long_length(data, len_of_len)?,
            }
        }
        0xc0..=0xf7 => Header {
            list: true,
            offset: 1,
            len: usize::from(prefix - LIST_OFFSET),
        },
        0xf8..=0xff => {
            let len_of_len = usize::from(prefix - LONG_LIST_OFFSET);
            Header {
                list: true,
                offset: 1 + len_of_len,
                len: read_long_length(data, len_of_len)?,
            }
        }
    };

    let end = header
        .offset
        .checked_add(header.len)
        .ok_or(RlpError::LengthOverflow)?;
    if end > data.len() {
        return Err(RlpError::UnexpectedEnd {
            needed: end,
            available: data.len(),
        });
    }
    Ok(header)
}

fn decode_at_depth(data: &[u8], depth: usize) -> Result<(usize, RlpItem), RlpError> {
    if depth > MAX_DEPTH {
        return Err(RlpError::TooDeep { max: MAX_DEPTH });
    }
    let header = decode_header(data)?;
    let end = header.offset + header.len;
    let payload = &data[header.offset..end];

    if !header.list {
        return Ok((end, RlpItem::Bytes(payload.to_vec())));
    }

    let mut items = Vec::new();
    let mut position = 0;
    while position < payload.len() {
        let (consumed, item) = decode_at_depth(&payload[position..], depth + 1)?;
        position += consumed;
        items.push(item);
    }
    Ok((end, RlpItem::List(items)))
}

/// Decode the first item in `data`, returning how many bytes it occupied.
///
/// Trailing bytes are left for the caller, so a stream of sibling items can
/// be walked by repeatedly slicing past `consumed`.
pub fn decode_prefix(data: &[u8]) -> Result<(usize, RlpItem), RlpError> {
    decode_at_depth(data, 0)
}

/// Decode exactly one item spanning all of `data`.
pub fn decode(data: &[u8]) -> Result<RlpItem, RlpError> {
    let (consumed, item) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(RlpError::TrailingBytes {
            count: data.len() - consumed,
        });
    }
    Ok(item)
}

/// Decode `data` and require a list at the top level.
pub fn decode_list(data: &[u8]) -> Result<Vec<RlpItem>, RlpError> {
    match decode(data)? {
        RlpItem::List(items) => Ok(items),
        RlpItem::Bytes(_) => Err(RlpError::ExpectedList),
    }
}
