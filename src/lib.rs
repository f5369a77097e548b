use serde::{Deserialize, Serialize};

pub mod asset;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod exchange;
pub mod fountain;
pub mod frame;
pub mod key;
pub mod path;
pub mod preset;
pub mod scan;
pub mod transaction;

pub use asset::{Asset, KeyType, Network, UseInfo};
pub use codec::{Value, WireRecord};
pub use config::Config;
pub use display::FrameDisplay;
pub use error::{
    DecodeError, EncodeError, Error, ExchangeError, PathError, ReassemblyError, RecordError, Result,
};
pub use exchange::{
    Approval, ApprovalUi, Artifact, Disclosure, Keychain, RejectReason, Requester,
    RequesterState, Responder, ResponderState,
};
pub use fountain::{fragment_index, FountainDecoder, FountainEncoder, ReassemblyState};
pub use frame::{Frame, FrameFlags};
pub use key::{HdKey, Seed};
pub use path::{ChildIndex, ChildIndexSpec, DerivationPath, DerivationStep};
pub use preset::DerivationPreset;
pub use scan::ScanSession;
pub use transaction::{RequestBody, ResponseBody, TransactionRequest, TransactionResponse};

/// Outer type tags of every record that travels on the wire
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireTag {
    Uuid = 37,
    Seed = 300,
    HdKey = 303,
    DerivationPath = 304,
    UseInfo = 305,
    TransactionRequest = 312,
    TransactionResponse = 313,
    MultiFrame = 320,
    SeedRequestBody = 500,
    KeyRequestBody = 501,
}

impl WireTag {
    pub fn from_u64(val: u64) -> Option<Self> {
        match val {
            37 => Some(WireTag::Uuid),
            300 => Some(WireTag::Seed),
            303 => Some(WireTag::HdKey),
            304 => Some(WireTag::DerivationPath),
            305 => Some(WireTag::UseInfo),
            312 => Some(WireTag::TransactionRequest),
            313 => Some(WireTag::TransactionResponse),
            320 => Some(WireTag::MultiFrame),
            500 => Some(WireTag::SeedRequestBody),
            501 => Some(WireTag::KeyRequestBody),
            _ => None,
        }
    }

    pub fn value(self) -> u64 {
        self as u64
    }
}

/// Identify the record carried by an encoded envelope without decoding its body.
pub fn peek_tag(data: &[u8]) -> std::result::Result<WireTag, DecodeError> {
    let value = Value::decode(data)?;
    let tag = value
        .tag()
        .ok_or_else(|| DecodeError::MalformedEnvelope("outer tag not found".into()))?;
    WireTag::from_u64(tag)
        .ok_or_else(|| DecodeError::MalformedEnvelope(format!("unknown tag {}", tag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_values() {
        for tag in [
            WireTag::Uuid,
            WireTag::Seed,
            WireTag::HdKey,
            WireTag::DerivationPath,
            WireTag::UseInfo,
            WireTag::TransactionRequest,
            WireTag::TransactionResponse,
            WireTag::MultiFrame,
            WireTag::SeedRequestBody,
            WireTag::KeyRequestBody,
        ] {
            assert_eq!(WireTag::from_u64(tag.value()), Some(tag));
        }
        assert_eq!(WireTag::from_u64(0), None);
    }

    #[test]
    fn test_peek_tag() {
        let path = DerivationPath::master();
        assert_eq!(peek_tag(&path.encode()).unwrap(), WireTag::DerivationPath);

        let untagged = Value::map(vec![]).encode();
        assert!(matches!(
            peek_tag(&untagged),
            Err(DecodeError::MalformedEnvelope(_))
        ));
    }
}
