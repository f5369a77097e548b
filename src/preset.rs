//! Canonical derivation templates and their reverse recognition.
//!
//! Every generated template comes from the single `PRESETS` table; recognition
//! walks the same table for every supported use-info, so adding a row is the
//! only edit needed to support a new template in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::{KeyType, Network, UseInfo};
use crate::path::{DerivationPath, DerivationStep};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivationPreset {
    Master,
    Cosigner,
    Segwit,
    Custom,
}

struct PresetRow {
    preset: DerivationPreset,
    template: fn(&UseInfo) -> Vec<DerivationStep>,
}

/// Recognition order is table order.
const PRESETS: &[PresetRow] = &[
    PresetRow {
        preset: DerivationPreset::Master,
        template: master_steps,
    },
    PresetRow {
        preset: DerivationPreset::Cosigner,
        template: cosigner_steps,
    },
    PresetRow {
        preset: DerivationPreset::Segwit,
        template: segwit_steps,
    },
];

fn master_steps(_: &UseInfo) -> Vec<DerivationStep> {
    Vec::new()
}

// 48'/coin'/0'/2'
fn cosigner_steps(use_info: &UseInfo) -> Vec<DerivationStep> {
    vec![
        DerivationStep::hardened_const(48),
        DerivationStep::hardened_const(use_info.coin_type()),
        DerivationStep::hardened_const(0),
        DerivationStep::hardened_const(2),
    ]
}

// 84'/coin'/0'
fn segwit_steps(use_info: &UseInfo) -> Vec<DerivationStep> {
    vec![
        DerivationStep::hardened_const(84),
        DerivationStep::hardened_const(use_info.coin_type()),
        DerivationStep::hardened_const(0),
    ]
}

fn row(preset: DerivationPreset) -> Option<&'static PresetRow> {
    PRESETS.iter().find(|row| row.preset == preset)
}

impl DerivationPreset {
    pub const ALL: [DerivationPreset; 4] = [
        DerivationPreset::Master,
        DerivationPreset::Cosigner,
        DerivationPreset::Segwit,
        DerivationPreset::Custom,
    ];

    /// Canonical path for this preset, without fingerprint or depth.
    /// `Custom` has no template and yields the empty path.
    pub fn generate(self, use_info: &UseInfo) -> DerivationPath {
        match row(self) {
            Some(row) => DerivationPath::from_steps((row.template)(use_info)),
            None => DerivationPath::master(),
        }
    }

    /// Match `path` against the templates of every supported use-info.
    pub fn recognize(path: &DerivationPath) -> Option<DerivationPreset> {
        PRESETS
            .iter()
            .find(|row| UseInfo::all().any(|use_info| (row.template)(&use_info) == path.steps()))
            .map(|row| row.preset)
    }

    /// Match `path` against the templates of one fixed use-info.
    pub fn origin_preset(path: &DerivationPath, use_info: &UseInfo) -> Option<DerivationPreset> {
        PRESETS
            .iter()
            .find(|row| (row.template)(use_info) == path.steps())
            .map(|row| row.preset)
    }

    /// `recognize`, with unmatched paths shown as `Custom`.
    pub fn classify(path: &DerivationPath) -> DerivationPreset {
        Self::recognize(path).unwrap_or(DerivationPreset::Custom)
    }

    pub fn name(self) -> &'static str {
        match self {
            DerivationPreset::Master => "Master Key",
            DerivationPreset::Cosigner => "Cosigner",
            DerivationPreset::Segwit => "Segwit",
            DerivationPreset::Custom => "Custom",
        }
    }

    pub fn id(self) -> String {
        format!("derivation-{}", self)
    }

    /// SLIP-0132 extended key version bytes, where the preset implies one.
    pub fn base58_prefix(self, network: Network, key_type: KeyType) -> Option<u32> {
        match (self, network, key_type) {
            (DerivationPreset::Segwit, Network::Mainnet, KeyType::Private) => Some(0x04b2_430c), // zprv
            (DerivationPreset::Segwit, Network::Mainnet, KeyType::Public) => Some(0x04b2_4746), // zpub
            (DerivationPreset::Segwit, Network::Testnet, KeyType::Private) => Some(0x045f_18bc), // vprv
            (DerivationPreset::Segwit, Network::Testnet, KeyType::Public) => Some(0x045f_1cf6), // vpub
            _ => None,
        }
    }
}

impl fmt::Display for DerivationPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivationPreset::Master => write!(f, "master"),
            DerivationPreset::Cosigner => write!(f, "gordian"),
            DerivationPreset::Segwit => write!(f, "segwit"),
            DerivationPreset::Custom => write!(f, "custom"),
        }
    }
}
