//! Request/response records correlated by a shared transaction id.
//!
//! ```text
//! request  = #312({1: #37(uuid), 2: #500(seed-body) / #501(key-body), ? 3: description})
//! response = #313({1: #37(uuid), 2: #300(seed) / #303(hd-key)})
//! seed-body = {1: fingerprint}
//! key-body  = {? 1: is-private, 2: #304(path), ? 3: #305(use-info)}
//! ```

use std::num::NonZeroU32;

use uuid::Uuid;

use crate::asset::{KeyType, UseInfo};
use crate::codec::{read_bool, read_text, read_u32, Value, WireRecord};
use crate::error::{DecodeError, RecordError};
use crate::key::{HdKey, Seed};
use crate::path::DerivationPath;
use crate::WireTag;

fn uuid_to_value(id: &Uuid) -> Value {
    Value::tagged(WireTag::Uuid.value(), Value::Bytes(id.as_bytes().to_vec()))
}

fn uuid_from_value(value: &Value) -> Result<Uuid, DecodeError> {
    let bytes = value
        .untag(WireTag::Uuid.value())?
        .as_bytes()
        .ok_or(DecodeError::InvalidField("id"))?;
    Uuid::from_slice(bytes).map_err(|_| DecodeError::InvalidField("id"))
}

fn read_id(map: &Value) -> Result<Uuid, DecodeError> {
    uuid_from_value(
        map.get(1)
            .ok_or_else(|| DecodeError::malformed("transaction id missing"))?,
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    SeedLookup {
        fingerprint: NonZeroU32,
    },
    KeyLookup {
        key_type: KeyType,
        path: DerivationPath,
        use_info: UseInfo,
    },
}

impl RequestBody {
    /// Seed lookup by fingerprint; zero never names a seed.
    pub fn seed_lookup(fingerprint: u32) -> Result<Self, RecordError> {
        let fingerprint = NonZeroU32::new(fingerprint).ok_or(RecordError::ZeroFingerprint)?;
        Ok(RequestBody::SeedLookup { fingerprint })
    }

    fn to_value(&self) -> Value {
        match self {
            RequestBody::SeedLookup { fingerprint } => Value::tagged(
                WireTag::SeedRequestBody.value(),
                Value::map(vec![(1, Value::Unsigned(fingerprint.get() as u64))]),
            ),
            RequestBody::KeyLookup {
                key_type,
                path,
                use_info,
            } => {
                let mut entries = Vec::new();
                if key_type.is_private() {
                    entries.push((1, Value::Bool(true)));
                }
                entries.push((2, path.to_tagged()));
                if *use_info != UseInfo::default() {
                    entries.push((3, use_info.to_tagged()));
                }
                Value::tagged(WireTag::KeyRequestBody.value(), Value::map(entries))
            }
        }
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let tag = value
            .tag()
            .and_then(WireTag::from_u64)
            .ok_or_else(|| DecodeError::malformed("request body tag not found"))?;

        match tag {
            WireTag::SeedRequestBody => {
                let map = value.untag(tag.value())?.expect_map()?;
                let fingerprint = read_u32(
                    map.get(1)
                        .ok_or_else(|| DecodeError::malformed("seed fingerprint missing"))?,
                    "fingerprint",
                )
                .map_err(|_| DecodeError::InvalidFingerprint)?;
                let fingerprint = NonZeroU32::new(fingerprint).ok_or(DecodeError::InvalidFingerprint)?;
                Ok(RequestBody::SeedLookup { fingerprint })
            }
            WireTag::KeyRequestBody => {
                let map = value.untag(tag.value())?.expect_map()?;
                let is_private = map
                    .get(1)
                    .map(|v| read_bool(v, "is_private"))
                    .transpose()?
                    .unwrap_or(false);
                let path = DerivationPath::from_tagged(
                    map.get(2)
                        .ok_or_else(|| DecodeError::malformed("key path missing"))?,
                )?;
                let use_info = map.get(3).map(UseInfo::from_tagged).transpose()?.unwrap_or_default();
                Ok(RequestBody::KeyLookup {
                    key_type: KeyType::from_private(is_private),
                    path,
                    use_info,
                })
            }
            other => Err(DecodeError::malformed(format!(
                "unexpected request body tag {}",
                other.value()
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub id: Uuid,
    pub body: RequestBody,
    pub description: Option<String>,
}

impl TransactionRequest {
    /// New request with a fresh random id.
    pub fn new(body: RequestBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            body,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl WireRecord for TransactionRequest {
    const TAG: WireTag = WireTag::TransactionRequest;

    fn to_untagged(&self) -> Value {
        let mut entries = vec![(1, uuid_to_value(&self.id)), (2, self.body.to_value())];
        if let Some(description) = &self.description {
            entries.push((3, Value::Text(description.clone())));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;
        let id = read_id(map)?;
        let body = RequestBody::from_value(
            map.get(2)
                .ok_or_else(|| DecodeError::malformed("request body missing"))?,
        )?;
        let description = map.get(3).map(|v| read_text(v, "description")).transpose()?;
        Ok(Self {
            id,
            body,
            description,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseBody {
    Seed(Seed),
    Key(HdKey),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub body: ResponseBody,
}

impl TransactionResponse {
    /// Response correlated to `request`.
    pub fn answering(request: &TransactionRequest, body: ResponseBody) -> Self {
        Self {
            id: request.id,
            body,
        }
    }
}

impl WireRecord for TransactionResponse {
    const TAG: WireTag = WireTag::TransactionResponse;

    fn to_untagged(&self) -> Value {
        let body = match &self.body {
            ResponseBody::Seed(seed) => seed.to_tagged(),
            ResponseBody::Key(key) => key.to_tagged(),
        };
        Value::map(vec![(1, uuid_to_value(&self.id)), (2, body)])
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;
        let id = read_id(map)?;
        let body_value = map
            .get(2)
            .ok_or_else(|| DecodeError::malformed("response body missing"))?;
        let body = match body_value.tag().and_then(WireTag::from_u64) {
            Some(WireTag::Seed) => ResponseBody::Seed(Seed::from_tagged(body_value)?),
            Some(WireTag::HdKey) => ResponseBody::Key(HdKey::from_tagged(body_value)?),
            _ => return Err(DecodeError::malformed("unexpected response body")),
        };
        Ok(Self { id, body })
    }
}
