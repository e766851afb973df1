//! Canonical event signatures and their on-chain identifiers.
//!
//! The identifier of an event is `keccak256("Name(type1,type2,...)")`, the same
//! value the chain writes into topic0. Registry construction and the sync
//! driver's log filter both go through [`identifier`], so the two always agree.

use alloy::json_abi::Event;
use alloy::primitives::{B256, keccak256};

/// Event name plus ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSignature {
    name: String,
    params: Vec<String>,
}

impl EventSignature {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Build the signature of an ABI event fragment.
    ///
    /// Tuple parameters are rendered as their canonical component list, e.g.
    /// `(address,uint8,bytes4[])[]`.
    pub fn from_fragment(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            params: event
                .inputs
                .iter()
                .map(|param| param.selector_type().into_owned())
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Canonical text form: `name(type1,type2,...)`.
    pub fn canonical(&self) -> String {
        format!("{}({})", self.name, self.params.join(","))
    }

    pub fn identifier(&self) -> B256 {
        identifier(&self.canonical())
    }
}

impl std::fmt::Display for EventSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Hash canonical signature text into an event identifier.
pub fn identifier(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_identifier_matches_well_known_topic() {
        let id = identifier("Transfer(address,address,uint256)");
        assert_eq!(
            format!("{:#x}", id),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_hashing_is_deterministic() {
        let sig = EventSignature::new(
            "ProductCreated",
            vec![
                "uint256".to_string(),
                "string".to_string(),
                "uint256".to_string(),
                "uint256".to_string(),
            ],
        );
        assert_eq!(sig.identifier(), sig.identifier());
        assert_eq!(sig.identifier(), identifier(&sig.canonical()));
    }

    #[test]
    fn test_canonical_text_has_no_whitespace() {
        let event = Event::parse("event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)")
            .unwrap();
        let sig = EventSignature::from_fragment(&event);
        assert_eq!(sig.canonical(), "Transfer(address,address,uint256)");
        assert_eq!(sig.name(), "Transfer");
        assert_eq!(sig.params().len(), 3);
    }

    #[test]
    fn test_from_fragment_agrees_with_alloy_selector() {
        let event = Event::parse(
            "event RoyaltiesUpdated(address indexed contractAddress, address[] recipients, uint256[] percentages)",
        )
        .unwrap();
        let sig = EventSignature::from_fragment(&event);
        assert_eq!(sig.canonical(), "RoyaltiesUpdated(address,address[],uint256[])");
        assert_eq!(sig.identifier(), event.selector());
    }

    #[test]
    fn test_same_name_different_params_differ() {
        let current = identifier("ProductCreated(uint256,string,uint256,uint256)");
        let deprecated = identifier("ProductCreated(uint256,string,uint256)");
        assert_ne!(current, deprecated);
    }
}
