//! Tagged, integer-keyed binary value model.
//!
//! Values use the CBOR major-type layout (RFC 8949) restricted to what the
//! records in this crate need: unsigned integers, byte and text strings,
//! arrays, maps with unsigned integer keys, tags and booleans. Only definite
//! lengths are accepted. Encoding always uses the shortest head and emits
//! map entries sorted by key.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::DecodeError;
use crate::WireTag;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u64 = 20;
const SIMPLE_TRUE: u64 = 21;

/// Maximum nesting of arrays, maps and tags accepted on decode.
pub const MAX_NESTING: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Unsigned(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(u64, Value)>),
    Tagged(u64, Box<Value>),
    Bool(bool),
}

impl Value {
    /// Build a map, ordering entries by key.
    pub fn map(mut entries: Vec<(u64, Value)>) -> Self {
        entries.sort_by_key(|(key, _)| *key);
        Value::Map(entries)
    }

    pub fn tagged(tag: u64, inner: Value) -> Self {
        Value::Tagged(tag, Box::new(inner))
    }

    /// Encode value to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Unsigned(n) => write_head(buf, MAJOR_UNSIGNED, *n),
            Value::Bytes(bytes) => {
                write_head(buf, MAJOR_BYTES, bytes.len() as u64);
                buf.extend_from_slice(bytes);
            }
            Value::Text(text) => {
                write_head(buf, MAJOR_TEXT, text.len() as u64);
                buf.extend_from_slice(text.as_bytes());
            }
            Value::Array(items) => {
                write_head(buf, MAJOR_ARRAY, items.len() as u64);
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::Map(entries) => {
                write_head(buf, MAJOR_MAP, entries.len() as u64);
                for (key, value) in entries {
                    write_head(buf, MAJOR_UNSIGNED, *key);
                    value.write_to(buf);
                }
            }
            Value::Tagged(tag, inner) => {
                write_head(buf, MAJOR_TAG, *tag);
                inner.write_to(buf);
            }
            Value::Bool(flag) => {
                let simple = if *flag { SIMPLE_TRUE } else { SIMPLE_FALSE };
                write_head(buf, MAJOR_SIMPLE, simple);
            }
        }
    }

    /// Decode a single value; trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        let value = read_value(&mut cursor, 0)?;
        if cursor.position() as usize != data.len() {
            return Err(DecodeError::malformed("trailing bytes after value"));
        }
        Ok(value)
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a map entry. Non-map values have no entries.
    pub fn get(&self, key: u64) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Tag number, if this value is tagged.
    pub fn tag(&self) -> Option<u64> {
        match self {
            Value::Tagged(tag, _) => Some(*tag),
            _ => None,
        }
    }

    /// Strip the expected outer tag.
    pub fn untag(&self, expected: u64) -> Result<&Value, DecodeError> {
        match self {
            Value::Tagged(tag, inner) if *tag == expected => Ok(inner),
            Value::Tagged(tag, _) => Err(DecodeError::malformed(format!(
                "expected tag {}, found {}",
                expected, tag
            ))),
            _ => Err(DecodeError::malformed(format!("tag {} not found", expected))),
        }
    }

    /// The value as a map, or `MalformedEnvelope`.
    pub fn expect_map(&self) -> Result<&Value, DecodeError> {
        match self {
            Value::Map(_) => Ok(self),
            _ => Err(DecodeError::malformed("body is not a map")),
        }
    }
}

fn write_head(buf: &mut Vec<u8>, major: u8, value: u64) {
    let major = major << 5;
    if value < 24 {
        buf.push(major | value as u8);
    } else if value <= u8::MAX as u64 {
        buf.push(major | 24);
        buf.push(value as u8);
    } else if value <= u16::MAX as u64 {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value as u16);
        buf.push(major | 25);
        buf.extend_from_slice(&bytes);
    } else if value <= u32::MAX as u64 {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, value as u32);
        buf.push(major | 26);
        buf.extend_from_slice(&bytes);
    } else {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, value);
        buf.push(major | 27);
        buf.extend_from_slice(&bytes);
    }
}

fn truncated(_: std::io::Error) -> DecodeError {
    DecodeError::malformed("truncated input")
}

fn read_head(cursor: &mut Cursor<&[u8]>) -> Result<(u8, u64), DecodeError> {
    let initial = cursor.read_u8().map_err(truncated)?;
    let major = initial >> 5;
    let info = initial & 0x1f;

    if major == MAJOR_SIMPLE && info >= 24 {
        return Err(DecodeError::malformed("unsupported simple value"));
    }

    let value = match info {
        0..=23 => info as u64,
        24 => cursor.read_u8().map_err(truncated)? as u64,
        25 => cursor.read_u16::<BigEndian>().map_err(truncated)? as u64,
        26 => cursor.read_u32::<BigEndian>().map_err(truncated)? as u64,
        27 => cursor.read_u64::<BigEndian>().map_err(truncated)?,
        _ => return Err(DecodeError::malformed("indefinite or reserved length")),
    };
    Ok((major, value))
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}

fn read_payload(cursor: &mut Cursor<&[u8]>, len: u64) -> Result<Vec<u8>, DecodeError> {
    if len > remaining(cursor) {
        return Err(DecodeError::malformed("string length exceeds input"));
    }
    let mut payload = vec![0u8; len as usize];
    cursor.read_exact(&mut payload).map_err(truncated)?;
    Ok(payload)
}

fn read_value(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Value, DecodeError> {
    if depth > MAX_NESTING {
        return Err(DecodeError::malformed("nesting too deep"));
    }

    let (major, arg) = read_head(cursor)?;
    match major {
        MAJOR_UNSIGNED => Ok(Value::Unsigned(arg)),
        MAJOR_BYTES => Ok(Value::Bytes(read_payload(cursor, arg)?)),
        MAJOR_TEXT => {
            let raw = read_payload(cursor, arg)?;
            let text = String::from_utf8(raw)
                .map_err(|_| DecodeError::malformed("text is not valid utf-8"))?;
            Ok(Value::Text(text))
        }
        MAJOR_ARRAY => {
            // every item needs at least one byte
            if arg > remaining(cursor) {
                return Err(DecodeError::malformed("array length exceeds input"));
            }
            let mut items = Vec::with_capacity(arg as usize);
            for _ in 0..arg {
                items.push(read_value(cursor, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        MAJOR_MAP => {
            if arg.saturating_mul(2) > remaining(cursor) {
                return Err(DecodeError::malformed("map length exceeds input"));
            }
            let mut entries: Vec<(u64, Value)> = Vec::with_capacity(arg as usize);
            for _ in 0..arg {
                let (key_major, key) = read_head(cursor)?;
                if key_major != MAJOR_UNSIGNED {
                    return Err(DecodeError::malformed("map key is not an unsigned integer"));
                }
                if entries.iter().any(|(k, _)| *k == key) {
                    return Err(DecodeError::malformed(format!("duplicate map key {}", key)));
                }
                let value = read_value(cursor, depth + 1)?;
                entries.push((key, value));
            }
            Ok(Value::Map(entries))
        }
        MAJOR_TAG => {
            let inner = read_value(cursor, depth + 1)?;
            Ok(Value::tagged(arg, inner))
        }
        MAJOR_SIMPLE => match arg {
            SIMPLE_FALSE => Ok(Value::Bool(false)),
            SIMPLE_TRUE => Ok(Value::Bool(true)),
            _ => Err(DecodeError::malformed("unsupported simple value")),
        },
        _ => Err(DecodeError::malformed("unsupported major type")),
    }
}

/// Range-checked field readers shared by the record decoders.
pub(crate) fn read_u32(value: &Value, field: &'static str) -> Result<u32, DecodeError> {
    value
        .as_unsigned()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(DecodeError::InvalidField(field))
}

pub(crate) fn read_bool(value: &Value, field: &'static str) -> Result<bool, DecodeError> {
    value.as_bool().ok_or(DecodeError::InvalidField(field))
}

pub(crate) fn read_bytes(value: &Value, field: &'static str) -> Result<Vec<u8>, DecodeError> {
    value
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or(DecodeError::InvalidField(field))
}

pub(crate) fn read_text(value: &Value, field: &'static str) -> Result<String, DecodeError> {
    value
        .as_text()
        .map(str::to_owned)
        .ok_or(DecodeError::InvalidField(field))
}

/// A record with its own wire tag wrapping an integer-keyed map.
pub trait WireRecord: Sized {
    const TAG: WireTag;

    /// Untagged map body
    fn to_untagged(&self) -> Value;

    fn from_untagged(value: &Value) -> Result<Self, DecodeError>;

    fn to_tagged(&self) -> Value {
        Value::tagged(Self::TAG.value(), self.to_untagged())
    }

    fn from_tagged(value: &Value) -> Result<Self, DecodeError> {
        Self::from_untagged(value.untag(Self::TAG.value())?)
    }

    fn encode(&self) -> Vec<u8> {
        self.to_tagged().encode()
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::from_tagged(&Value::decode(data)?)
    }
}
