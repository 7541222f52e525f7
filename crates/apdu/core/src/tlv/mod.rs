//! BER-TLV codec
//!
//! Tags are carried as the big-endian value of their encoded bytes, so the
//! two-byte tag `7F 49` is `0x7F49`. Lengths use the short form below `0x80`
//! and the `0x81`..`0x84` long forms above it. A constructed record keeps its
//! children encoded in its value; [`Tlv::children`] decodes them on demand.

mod error;

use bytes::{BufMut, Bytes, BytesMut};

pub use error::TlvError;

/// Bit of the first tag byte marking a constructed record
const CONSTRUCTED: u8 = 0x20;

/// Low five bits of the first tag byte announcing a multi-byte tag
const MULTI_BYTE_TAG: u8 = 0x1F;

/// Longest supported tag, in bytes
const MAX_TAG_LEN: usize = 8;

/// A single BER-TLV record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tlv {
    tag: u64,
    value: Bytes,
}

impl Tlv {
    /// Create a record, rejecting tags that are not valid BER tags
    pub fn new(tag: u64, value: impl Into<Bytes>) -> Result<Self, TlvError> {
        tag_bytes(tag)?;
        Ok(Self {
            tag,
            value: value.into(),
        })
    }

    /// Create a constructed record whose value is the encoding of `children`
    pub fn constructed(tag: u64, children: &[Self]) -> Result<Self, TlvError> {
        let mut value = BytesMut::new();
        for child in children {
            child.write_to(&mut value)?;
        }
        Self::new(tag, value.freeze())
    }

    /// Record tag
    pub const fn tag(&self) -> u64 {
        self.tag
    }

    /// Record value
    pub const fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume the record, returning its value
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Whether the tag carries the constructed bit
    pub fn is_constructed(&self) -> bool {
        first_tag_byte(self.tag) & CONSTRUCTED != 0
    }

    /// Decode the value as a sequence of child records
    pub fn children(&self) -> Result<Vec<Self>, TlvError> {
        parse_sequence(self.value.clone())
    }

    /// Encoded length of this record
    pub fn encoded_len(&self) -> usize {
        tag_len(self.tag) + length_len(self.value.len()) + self.value.len()
    }

    /// Encode this record
    pub fn to_bytes(&self) -> Result<Bytes, TlvError> {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buffer)?;
        Ok(buffer.freeze())
    }

    /// Append the encoding of this record to `buffer`
    pub fn write_to(&self, buffer: &mut BytesMut) -> Result<(), TlvError> {
        let len = tag_len(self.tag);
        buffer.put_slice(&self.tag.to_be_bytes()[MAX_TAG_LEN - len..]);
        put_length(buffer, self.value.len())?;
        buffer.put_slice(&self.value);
        Ok(())
    }

    /// Parse one record from the front of `data`, returning it and the rest
    pub fn parse(data: Bytes) -> Result<(Self, Bytes), TlvError> {
        let (tag, header) = read_tag(&data)?;
        let (length, length_bytes) = read_length(&data[header..])?;
        let start = header + length_bytes;
        let available = data.len() - start;
        if length > available {
            return Err(TlvError::LengthOverflow {
                declared: length,
                available,
            });
        }
        let value = data.slice(start..start + length);
        Ok((Self { tag, value }, data.slice(start + length..)))
    }
}

/// Encode a single record
pub fn encode(tag: u64, value: &[u8]) -> Result<Bytes, TlvError> {
    Tlv::new(tag, Bytes::copy_from_slice(value))?.to_bytes()
}

/// Decode exactly one record; bytes after it are an error
pub fn decode(data: &[u8]) -> Result<Tlv, TlvError> {
    let (record, rest) = Tlv::parse(Bytes::copy_from_slice(data))?;
    if !rest.is_empty() {
        return Err(TlvError::TrailingData(rest.len()));
    }
    Ok(record)
}

/// Decode consecutive records until the buffer is exhausted
pub fn decode_sequence(data: &[u8]) -> Result<Vec<Tlv>, TlvError> {
    parse_sequence(Bytes::copy_from_slice(data))
}

/// Value of the first top-level record carrying `tag`
pub fn value_for_tag(data: &[u8], tag: u64) -> Result<Bytes, TlvError> {
    decode_sequence(data)?
        .into_iter()
        .find(|record| record.tag == tag)
        .map(Tlv::into_value)
        .ok_or(TlvError::TagNotFound(tag))
}

/// First record in `records` carrying `tag`
pub fn find(records: &[Tlv], tag: u64) -> Option<&Tlv> {
    records.iter().find(|record| record.tag == tag)
}

/// Every record in `records` carrying `tag`, in order
pub fn find_all(records: &[Tlv], tag: u64) -> impl Iterator<Item = &Tlv> {
    records.iter().filter(move |record| record.tag == tag)
}

fn parse_sequence(mut data: Bytes) -> Result<Vec<Tlv>, TlvError> {
    let mut records = Vec::new();
    while !data.is_empty() {
        let (record, rest) = Tlv::parse(data)?;
        records.push(record);
        data = rest;
    }
    Ok(records)
}

const fn tag_len(tag: u64) -> usize {
    if tag == 0 {
        1
    } else {
        (u64::BITS - tag.leading_zeros()).div_ceil(8) as usize
    }
}

const fn first_tag_byte(tag: u64) -> u8 {
    (tag >> ((tag_len(tag) - 1) * 8)) as u8
}

/// Validate `tag` and return its encoded length
fn tag_bytes(tag: u64) -> Result<usize, TlvError> {
    let len = tag_len(tag);
    let bytes = &tag.to_be_bytes()[MAX_TAG_LEN - len..];
    let valid = match bytes {
        [single] => single & MULTI_BYTE_TAG != MULTI_BYTE_TAG,
        [first, middle @ .., last] => {
            first & MULTI_BYTE_TAG == MULTI_BYTE_TAG
                && middle.iter().all(|b| b & 0x80 != 0)
                && last & 0x80 == 0
        }
        [] => false,
    };
    if valid { Ok(len) } else { Err(TlvError::InvalidTag(tag)) }
}

fn read_tag(data: &[u8]) -> Result<(u64, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::Truncated)?;
    let mut tag = u64::from(first);
    if first & MULTI_BYTE_TAG != MULTI_BYTE_TAG {
        return Ok((tag, 1));
    }

    for (index, byte) in data.iter().enumerate().skip(1) {
        if index >= MAX_TAG_LEN {
            return Err(TlvError::InvalidTag(tag));
        }
        tag = (tag << 8) | u64::from(*byte);
        if byte & 0x80 == 0 {
            return Ok((tag, index + 1));
        }
    }
    Err(TlvError::Truncated)
}

fn read_length(data: &[u8]) -> Result<(usize, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::Truncated)?;
    match first {
        0x00..=0x7F => Ok((usize::from(first), 1)),
        0x80 => Err(TlvError::IndefiniteLength),
        0x81..=0x84 => {
            let count = usize::from(first & 0x7F);
            let bytes = data.get(1..=count).ok_or(TlvError::Truncated)?;
            let length = bytes
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            Ok((length, count + 1))
        }
        other => Err(TlvError::UnsupportedLength(other)),
    }
}

const fn length_len(length: usize) -> usize {
    match length {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 5,
    }
}

/// Lengths past `u32::MAX` have no four-byte long form
fn put_length(buffer: &mut BytesMut, length: usize) -> Result<(), TlvError> {
    let bytes = u32::try_from(length)
        .map_err(|_| TlvError::ValueTooLong(length))?
        .to_be_bytes();
    match length_len(length) - 1 {
        0 => buffer.put_u8(bytes[3]),
        count => {
            buffer.put_u8(0x80 | count as u8);
            buffer.put_slice(&bytes[4 - count..]);
        }
    }
    Ok(())
}
