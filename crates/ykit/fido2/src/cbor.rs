//! CBOR helpers for CTAP2 messages
//!
//! CTAP2 requests and responses are maps with small integer keys. Requests are
//! built with [`MapBuilder`], which writes keys in canonical CTAP order;
//! responses are read through [`MapReader`].

use std::cmp::Ordering;

pub use cbor4ii::core::Value;

use crate::error::{Fido2Error, Result};

/// Encode a value
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    cbor4ii::serde::to_writer(&mut out, value).map_err(|e| Fido2Error::cbor(e.to_string()))?;
    Ok(out)
}

/// Decode a single value
pub fn decode(data: &[u8]) -> Result<Value> {
    cbor4ii::serde::from_slice(data).map_err(|e| Fido2Error::cbor(e.to_string()))
}

/// Integer value
pub fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

/// Byte string value
pub fn bytes(value: &[u8]) -> Value {
    Value::Bytes(value.to_vec())
}

/// Text string value
pub fn text(value: &str) -> Value {
    Value::Text(value.to_owned())
}

/// Text-keyed map, in canonical order
pub fn text_map<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    let mut entries: Vec<(Value, Value)> = entries.into_iter().map(|(k, v)| (text(k), v)).collect();
    entries.sort_by(|(a, _), (b, _)| canonical_order(a, b));
    Value::Map(entries)
}

/// Canonical CTAP2 key order: shorter encodings first, then bytewise
fn canonical_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => match (*a >= 0, *b >= 0) {
            (true, true) => a.cmp(b),
            (false, false) => b.cmp(a),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        },
        (Value::Text(a), Value::Text(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        (Value::Integer(_), _) => Ordering::Less,
        (_, Value::Integer(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Builder for integer-keyed request maps
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`
    pub fn insert(mut self, key: i64, value: Value) -> Self {
        self.entries.push((int(key), value));
        self
    }

    /// Add `key` when `value` is present
    pub fn insert_opt(self, key: i64, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.insert(key, value),
            None => self,
        }
    }

    /// Finished map with keys in canonical order
    pub fn build(mut self) -> Value {
        self.entries.sort_by(|(a, _), (b, _)| canonical_order(a, b));
        Value::Map(self.entries)
    }
}

/// Read access to a response map
#[derive(Debug, Clone)]
pub struct MapReader {
    entries: Vec<(Value, Value)>,
}

impl MapReader {
    /// Reader over `value`, which must be a map
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            other => Err(Fido2Error::cbor(format!("expected a map, got {other:?}"))),
        }
    }

    /// Decode `data` as a map
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::new(decode(data)?)
    }

    /// Value under an integer key
    pub fn get(&self, key: i64) -> Option<&Value> {
        self.find(|k| matches!(k, Value::Integer(k) if *k == i128::from(key)))
    }

    /// Value under a text key
    pub fn get_text(&self, key: &str) -> Option<&Value> {
        self.find(|k| matches!(k, Value::Text(k) if k == key))
    }

    fn find(&self, matches: impl Fn(&Value) -> bool) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| matches(k)).map(|(_, v)| v)
    }

    /// Value under `key`, which must be present
    pub fn require(&self, key: i64) -> Result<&Value> {
        self.get(key).ok_or_else(|| Fido2Error::cbor(format!("missing key {key}")))
    }
}

/// Byte string contents
pub fn as_bytes(value: &Value) -> Result<&[u8]> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        other => Err(Fido2Error::cbor(format!("expected bytes, got {other:?}"))),
    }
}

/// Text string contents
pub fn as_text(value: &Value) -> Result<&str> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(Fido2Error::cbor(format!("expected text, got {other:?}"))),
    }
}

/// Integer contents
pub fn as_int(value: &Value) -> Result<i128> {
    match value {
        Value::Integer(value) => Ok(*value),
        other => Err(Fido2Error::cbor(format!("expected an integer, got {other:?}"))),
    }
}

/// Unsigned integer contents
pub fn as_u64(value: &Value) -> Result<u64> {
    u64::try_from(as_int(value)?).map_err(|_| Fido2Error::cbor("integer out of range"))
}

/// Boolean contents
pub fn as_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(value) => Ok(*value),
        other => Err(Fido2Error::cbor(format!("expected a boolean, got {other:?}"))),
    }
}

/// Array contents
pub fn as_array(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Fido2Error::cbor(format!("expected an array, got {other:?}"))),
    }
}

/// Text array contents
pub fn as_text_array(value: &Value) -> Result<Vec<String>> {
    as_array(value)?
        .iter()
        .map(|item| as_text(item).map(str::to_owned))
        .collect()
}
