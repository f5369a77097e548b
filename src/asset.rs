use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{read_u32, Value, WireRecord};
use crate::error::DecodeError;
use crate::preset::DerivationPreset;
use crate::WireTag;

/// Chains supported for key export, keyed by their SLIP-0044 coin type
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    #[default]
    Btc = 0,
    Eth = 60,
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::Btc, Asset::Eth];

    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(Asset::Btc),
            60 => Some(Asset::Eth),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Asset::Btc => "Bitcoin",
            Asset::Eth => "Ethereum",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
        }
    }

    /// Presets offered for this asset, in display order
    pub fn derivations(self) -> &'static [DerivationPreset] {
        match self {
            Asset::Btc => &[
                DerivationPreset::Master,
                DerivationPreset::Cosigner,
                DerivationPreset::Segwit,
                DerivationPreset::Custom,
            ],
            Asset::Eth => &[DerivationPreset::Master, DerivationPreset::Custom],
        }
    }

    pub fn default_derivation(self) -> DerivationPreset {
        DerivationPreset::Master
    }
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    #[default]
    Mainnet = 0,
    Testnet = 1,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Testnet];

    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(Network::Mainnet),
            1 => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Private,
    Public,
}

impl KeyType {
    pub fn is_private(self) -> bool {
        matches!(self, KeyType::Private)
    }

    pub fn from_private(is_private: bool) -> Self {
        if is_private {
            KeyType::Private
        } else {
            KeyType::Public
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Private => write!(f, "private"),
            KeyType::Public => write!(f, "public"),
        }
    }
}

/// The (asset, network) pair that selects coin-type specific templates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UseInfo {
    pub asset: Asset,
    pub network: Network,
}

impl UseInfo {
    pub fn new(asset: Asset, network: Network) -> Self {
        Self { asset, network }
    }

    /// Every supported combination.
    pub fn all() -> impl Iterator<Item = UseInfo> {
        Asset::ALL
            .into_iter()
            .flat_map(|asset| Network::ALL.into_iter().map(move |network| UseInfo::new(asset, network)))
    }

    /// Coin type used in BIP-44 style paths. All testnets share coin type 1.
    pub fn coin_type(&self) -> u32 {
        match self.network {
            Network::Mainnet => self.asset as u32,
            Network::Testnet => 1,
        }
    }
}

impl fmt::Display for UseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.asset.symbol(), self.network)
    }
}

impl WireRecord for UseInfo {
    const TAG: WireTag = WireTag::UseInfo;

    fn to_untagged(&self) -> Value {
        let mut entries = Vec::new();
        if self.asset != Asset::default() {
            entries.push((1, Value::Unsigned(self.asset as u64)));
        }
        if self.network != Network::default() {
            entries.push((2, Value::Unsigned(self.network as u64)));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;
        let asset = match map.get(1) {
            Some(v) => Asset::from_u32(read_u32(v, "asset")?).ok_or(DecodeError::InvalidField("asset"))?,
            None => Asset::default(),
        };
        let network = match map.get(2) {
            Some(v) => {
                Network::from_u32(read_u32(v, "network")?).ok_or(DecodeError::InvalidField("network"))?
            }
            None => Network::default(),
        };
        Ok(UseInfo { asset, network })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_types() {
        assert_eq!(UseInfo::new(Asset::Btc, Network::Mainnet).coin_type(), 0);
        assert_eq!(UseInfo::new(Asset::Btc, Network::Testnet).coin_type(), 1);
        assert_eq!(UseInfo::new(Asset::Eth, Network::Mainnet).coin_type(), 60);
        assert_eq!(UseInfo::new(Asset::Eth, Network::Testnet).coin_type(), 1);
    }

    #[test]
    fn test_default_use_info_is_empty_map() {
        let encoded = UseInfo::default().encode();
        // tag 305, empty map
        assert_eq!(encoded, vec![0xd9, 0x01, 0x31, 0xa0]);
        assert_eq!(UseInfo::decode(&encoded).unwrap(), UseInfo::default());
    }

    #[test]
    fn test_use_info_encode_decode() {
        let info = UseInfo::new(Asset::Eth, Network::Testnet);
        assert_eq!(UseInfo::decode(&info.encode()).unwrap(), info);
    }

    #[test]
    fn test_unknown_asset_rejected() {
        let value = Value::tagged(305, Value::map(vec![(1, Value::Unsigned(7))]));
        assert_eq!(
            UseInfo::decode(&value.encode()),
            Err(DecodeError::InvalidField("asset"))
        );
    }

    #[test]
    fn test_all_use_infos() {
        assert_eq!(UseInfo::all().count(), 4);
    }
}
