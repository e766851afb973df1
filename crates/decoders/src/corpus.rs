//! The contract ABIs whose events are mirrored.
//!
//! ABIs ship with the crate as JSON artifacts under `abis/`. The order of
//! [`AbiSource::ALL`] is the registration order used by the registry builder.

use alloy::json_abi::JsonAbi;
use mirror_common::types::Generation;

/// One ABI of the known corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiSource {
    Erc721,
    Minter,
    Factory,
    DiamondFactory,
    DiamondMarketplace,
    DeprecatedClassic,
    DeprecatedDiamond,
    ResaleMarketplace,
    CreditHandler,
}

impl AbiSource {
    pub const ALL: [AbiSource; 9] = [
        AbiSource::Erc721,
        AbiSource::Minter,
        AbiSource::Factory,
        AbiSource::DiamondFactory,
        AbiSource::DiamondMarketplace,
        AbiSource::DeprecatedClassic,
        AbiSource::DeprecatedDiamond,
        AbiSource::ResaleMarketplace,
        AbiSource::CreditHandler,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AbiSource::Erc721 => "erc721",
            AbiSource::Minter => "minter",
            AbiSource::Factory => "factory",
            AbiSource::DiamondFactory => "diamond_factory",
            AbiSource::DiamondMarketplace => "diamond_marketplace",
            AbiSource::DeprecatedClassic => "deprecated_classic",
            AbiSource::DeprecatedDiamond => "deprecated_diamond",
            AbiSource::ResaleMarketplace => "resale_marketplace",
            AbiSource::CreditHandler => "credit_handler",
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            AbiSource::Erc721
            | AbiSource::Minter
            | AbiSource::Factory
            | AbiSource::DeprecatedClassic
            | AbiSource::CreditHandler => Generation::Classic,
            AbiSource::DiamondFactory
            | AbiSource::DiamondMarketplace
            | AbiSource::DeprecatedDiamond
            | AbiSource::ResaleMarketplace => Generation::Diamond,
        }
    }

    /// Deprecated ABIs are no longer deployed but their historical logs are
    /// still indexed.
    pub fn is_deprecated(&self) -> bool {
        matches!(
            self,
            AbiSource::DeprecatedClassic | AbiSource::DeprecatedDiamond
        )
    }

    /// Raw JSON artifact bundled with the crate.
    pub fn abi_json(&self) -> &'static str {
        match self {
            AbiSource::Erc721 => include_str!("../abis/erc721.json"),
            AbiSource::Minter => include_str!("../abis/minter.json"),
            AbiSource::Factory => include_str!("../abis/factory.json"),
            AbiSource::DiamondFactory => include_str!("../abis/diamond_factory.json"),
            AbiSource::DiamondMarketplace => include_str!("../abis/diamond_marketplace.json"),
            AbiSource::DeprecatedClassic => include_str!("../abis/deprecated_classic.json"),
            AbiSource::DeprecatedDiamond => include_str!("../abis/deprecated_diamond.json"),
            AbiSource::ResaleMarketplace => include_str!("../abis/resale_marketplace.json"),
            AbiSource::CreditHandler => include_str!("../abis/credit_handler.json"),
        }
    }

    /// Parse the bundled artifact.
    pub fn load(&self) -> Result<CorpusAbi, serde_json::Error> {
        Ok(CorpusAbi {
            source: *self,
            generation: self.generation(),
            abi: serde_json::from_str(self.abi_json())?,
        })
    }
}

impl std::fmt::Display for AbiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed ABI ready for registration.
#[derive(Debug, Clone)]
pub struct CorpusAbi {
    pub source: AbiSource,
    pub generation: Generation,
    pub abi: JsonAbi,
}
