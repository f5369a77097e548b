//! Seed and HD key records. Key material is opaque bytes; no derivation
//! arithmetic happens here.

use std::fmt;
use std::num::NonZeroU32;

use crate::asset::{KeyType, UseInfo};
use crate::codec::{read_bool, read_bytes, read_text, read_u32, Value, WireRecord};
use crate::error::{DecodeError, RecordError};
use crate::path::DerivationPath;
use crate::WireTag;

/// Seed record (tag 300): `{1: bytes, ? 3: name, ? 4: note}`
#[derive(Clone, PartialEq, Eq)]
pub struct Seed {
    data: Vec<u8>,
    pub name: String,
    pub note: String,
}

impl Seed {
    pub fn new(data: Vec<u8>) -> Result<Self, RecordError> {
        if data.is_empty() {
            return Err(RecordError::EmptyField("seed data"));
        }
        Ok(Self {
            data,
            name: String::new(),
            note: String::new(),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

// Seed bytes stay out of logs.
impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("len", &self.data.len())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WireRecord for Seed {
    const TAG: WireTag = WireTag::Seed;

    fn to_untagged(&self) -> Value {
        let mut entries = vec![(1, Value::Bytes(self.data.clone()))];
        if !self.name.is_empty() {
            entries.push((3, Value::Text(self.name.clone())));
        }
        if !self.note.is_empty() {
            entries.push((4, Value::Text(self.note.clone())));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;
        let data = read_bytes(
            map.get(1)
                .ok_or_else(|| DecodeError::malformed("seed data missing"))?,
            "seed data",
        )?;
        if data.is_empty() {
            return Err(DecodeError::InvalidField("seed data"));
        }
        let name = map.get(3).map(|v| read_text(v, "name")).transpose()?;
        let note = map.get(4).map(|v| read_text(v, "note")).transpose()?;
        Ok(Seed {
            data,
            name: name.unwrap_or_default(),
            note: note.unwrap_or_default(),
        })
    }
}

/// Hierarchical deterministic key record (tag 303).
///
/// ```text
/// { ? 1: is-master, ? 2: is-private, 3: key-data, ? 4: chain-code,
///   ? 5: #305(use-info), ? 6: #304(origin), ? 7: #304(children),
///   ? 8: parent-fingerprint, ? 9: name }
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct HdKey {
    pub is_master: bool,
    pub key_type: KeyType,
    key_data: Vec<u8>,
    pub chain_code: Option<Vec<u8>>,
    pub use_info: UseInfo,
    pub origin: Option<DerivationPath>,
    pub children: Option<DerivationPath>,
    pub parent_fingerprint: Option<NonZeroU32>,
    pub name: String,
}

impl HdKey {
    pub fn new(key_type: KeyType, key_data: Vec<u8>, use_info: UseInfo) -> Result<Self, RecordError> {
        if key_data.is_empty() {
            return Err(RecordError::EmptyField("key data"));
        }
        Ok(Self {
            is_master: false,
            key_type,
            key_data,
            chain_code: None,
            use_info,
            origin: None,
            children: None,
            parent_fingerprint: None,
            name: String::new(),
        })
    }

    pub fn key_data(&self) -> &[u8] {
        &self.key_data
    }

    pub fn with_parent_fingerprint(mut self, fingerprint: u32) -> Result<Self, RecordError> {
        self.parent_fingerprint = Some(NonZeroU32::new(fingerprint).ok_or(RecordError::ZeroFingerprint)?);
        Ok(self)
    }
}

impl fmt::Debug for HdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self.origin.as_ref().map(|p| p.to_string());
        f.debug_struct("HdKey")
            .field("is_master", &self.is_master)
            .field("key_type", &self.key_type)
            .field("use_info", &self.use_info)
            .field("origin", &origin)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WireRecord for HdKey {
    const TAG: WireTag = WireTag::HdKey;

    fn to_untagged(&self) -> Value {
        let mut entries = Vec::new();
        if self.is_master {
            entries.push((1, Value::Bool(true)));
        }
        if self.key_type.is_private() {
            entries.push((2, Value::Bool(true)));
        }
        entries.push((3, Value::Bytes(self.key_data.clone())));
        if let Some(chain_code) = &self.chain_code {
            entries.push((4, Value::Bytes(chain_code.clone())));
        }
        if self.use_info != UseInfo::default() {
            entries.push((5, self.use_info.to_tagged()));
        }
        if let Some(origin) = &self.origin {
            entries.push((6, origin.to_tagged()));
        }
        if let Some(children) = &self.children {
            entries.push((7, children.to_tagged()));
        }
        if let Some(parent) = self.parent_fingerprint {
            entries.push((8, Value::Unsigned(parent.get() as u64)));
        }
        if !self.name.is_empty() {
            entries.push((9, Value::Text(self.name.clone())));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;

        let is_master = map.get(1).map(|v| read_bool(v, "is_master")).transpose()?.unwrap_or(false);
        let is_private = map.get(2).map(|v| read_bool(v, "is_private")).transpose()?.unwrap_or(false);
        let key_data = read_bytes(
            map.get(3)
                .ok_or_else(|| DecodeError::malformed("key data missing"))?,
            "key data",
        )?;
        if key_data.is_empty() {
            return Err(DecodeError::InvalidField("key data"));
        }
        let chain_code = map.get(4).map(|v| read_bytes(v, "chain code")).transpose()?;
        let use_info = map.get(5).map(UseInfo::from_tagged).transpose()?.unwrap_or_default();
        let origin = map.get(6).map(DerivationPath::from_tagged).transpose()?;
        let children = map.get(7).map(DerivationPath::from_tagged).transpose()?;
        let parent_fingerprint = match map.get(8) {
            Some(v) => Some(
                NonZeroU32::new(read_u32(v, "parent fingerprint")?).ok_or(DecodeError::InvalidFingerprint)?,
            ),
            None => None,
        };
        let name = map.get(9).map(|v| read_text(v, "name")).transpose()?;

        Ok(HdKey {
            is_master,
            key_type: KeyType::from_private(is_private),
            key_data,
            chain_code,
            use_info,
            origin,
            children,
            parent_fingerprint,
            name: name.unwrap_or_default(),
        })
    }
}
