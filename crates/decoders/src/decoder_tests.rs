//! End-to-end tests: registry lookup, fragment decoding and handler output.
//!
//! These tests build `LogRecord`s with the exact topic/data layout the chain
//! produces and run them through the bundled registry, so every step between a
//! raw log and its `StateChange` list is covered.

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::primitives::{Address, B256, Bytes, I256, U256};

use mirror_common::types::{Generation, LogRecord, OfferKey, RoyaltyShare, StateChange};

use crate::decode::{DecodeError, decode_log};
use crate::handlers::Handler;
use crate::registry::EventRegistry;
use crate::signature::identifier;

// ───────────────────────────── helpers ──────────────────────────────

const BLOCK_NUMBER: u64 = 42_000;

fn emitter() -> Address {
    Address::repeat_byte(0xE7)
}

fn build_record(signature: &str, topics: Vec<B256>, data: Vec<u8>, address: Address) -> LogRecord {
    LogRecord {
        identifier: identifier(signature),
        topics,
        data: Bytes::from(data),
        address,
        block_number: BLOCK_NUMBER,
        log_index: 3,
        tx_hash: B256::repeat_byte(0x77),
    }
}

/// ABI-encode the non-indexed values of a log.
fn encode_body(values: Vec<DynSolValue>) -> Vec<u8> {
    DynSolValue::Tuple(values).abi_encode_params()
}

fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

fn uint_topic(value: u64) -> B256 {
    B256::from(U256::from(value).to_be_bytes::<32>())
}

/// Left-pad an address into a 32-byte topic (EVM indexed address encoding).
fn address_to_topic(addr: Address) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[12..32].copy_from_slice(addr.as_slice());
    B256::from(bytes)
}

/// Decode through the registry and run the bound handler.
fn apply(registry: &EventRegistry, record: &LogRecord) -> Vec<StateChange> {
    let entry = registry.get(&record.identifier).expect("registered identifier");
    let decoded = decode_log(&entry.fragment, entry.generation, record).unwrap();
    let handler = entry.handler.expect("handled event");
    handler.apply(&decoded, &record.meta()).unwrap()
}

// ═══════════════════════════════════════════════════════════════════
//  Token events
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_transfer_all_indexed() {
    let registry = EventRegistry::build().unwrap();
    let from = Address::repeat_byte(0x11);
    let to = Address::repeat_byte(0x22);

    let record = build_record(
        "Transfer(address,address,uint256)",
        vec![address_to_topic(from), address_to_topic(to), uint_topic(5)],
        vec![],
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::TokenTransferred {
            contract: emitter(),
            token_index: U256::from(5),
            from,
            to,
        }]
    );
}

#[test]
fn test_token_uri_update_reads_string_body() {
    let registry = EventRegistry::build().unwrap();
    let record = build_record(
        "UpdatedTokenURI(uint256,string)",
        vec![],
        encode_body(vec![uint(8), DynSolValue::String("ipfs://token/8".into())]),
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::TokenUriUpdated {
            contract: emitter(),
            token_index: U256::from(8),
            uri: "ipfs://token/8".to_string(),
        }]
    );
}

// ═══════════════════════════════════════════════════════════════════
//  Collections across generations
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_classic_and_diamond_collection_logs_produce_same_change() {
    let registry = EventRegistry::build().unwrap();
    let body = encode_body(vec![
        DynSolValue::String("Genesis".into()),
        uint(1),
        uint(100),
    ]);

    let classic = build_record(
        "ProductCreated(uint256,string,uint256,uint256)",
        vec![uint_topic(0)],
        body.clone(),
        emitter(),
    );
    let diamond = build_record(
        "CreatedCollection(uint256,string,uint256,uint256)",
        vec![uint_topic(0)],
        body,
        emitter(),
    );

    let classic_entry = registry.get(&classic.identifier).unwrap();
    let diamond_entry = registry.get(&diamond.identifier).unwrap();
    assert_eq!(classic_entry.generation, Generation::Classic);
    assert_eq!(diamond_entry.generation, Generation::Diamond);

    let expected = vec![StateChange::CollectionCreated {
        contract: emitter(),
        collection_index: U256::ZERO,
        name: "Genesis".to_string(),
        starting_token: Some(U256::from(1)),
        length: U256::from(100),
    }];
    assert_eq!(apply(&registry, &classic), expected);
    assert_eq!(apply(&registry, &diamond), expected);
}

#[test]
fn test_deprecated_collection_layout() {
    let registry = EventRegistry::build().unwrap();
    let record = build_record(
        "ProductCreated(uint256,string,uint256)",
        vec![uint_topic(2)],
        encode_body(vec![DynSolValue::String("Legacy".into()), uint(50)]),
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::CollectionCreated {
            contract: emitter(),
            collection_index: U256::from(2),
            name: "Legacy".to_string(),
            starting_token: None,
            length: U256::from(50),
        }]
    );
}

#[test]
fn test_range_lock_across_generations() {
    let registry = EventRegistry::build().unwrap();
    let classic = build_record(
        "TradingLocked(uint256,uint256,uint256,uint256)",
        vec![uint_topic(4)],
        encode_body(vec![uint(10), uint(20), uint(5)]),
        emitter(),
    );
    let deprecated = build_record(
        "RangeLocked(uint256,uint256,uint256,uint256,string,uint256)",
        vec![],
        encode_body(vec![
            uint(1),
            uint(10),
            uint(20),
            uint(5),
            DynSolValue::String("Legacy".into()),
            uint(4),
        ]),
        emitter(),
    );

    let change = |collection_index| StateChange::RangeLocked {
        contract: emitter(),
        lock_index: U256::from(4),
        collection_index,
        start: U256::from(10),
        end: U256::from(20),
        locked_tokens: U256::from(5),
    };
    assert_eq!(apply(&registry, &classic), vec![change(None)]);
    assert_eq!(apply(&registry, &deprecated), vec![change(Some(U256::from(1)))]);
}

// ═══════════════════════════════════════════════════════════════════
//  Marketplaces
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_token_minted_decodes_with_its_own_fragment() {
    let registry = EventRegistry::build().unwrap();
    let token = Address::repeat_byte(0x44);
    let buyer = Address::repeat_byte(0x55);

    let classic = build_record(
        "TokenMinted(address,address,uint256,uint256,uint256)",
        vec![],
        encode_body(vec![
            DynSolValue::Address(buyer),
            DynSolValue::Address(token),
            uint(3),
            uint(1),
            uint(9),
        ]),
        emitter(),
    );
    let diamond = build_record(
        "TokenMinted(address,uint256,uint256,address)",
        vec![],
        encode_body(vec![
            DynSolValue::Address(token),
            uint(1),
            uint(9),
            DynSolValue::Address(buyer),
        ]),
        emitter(),
    );

    let minted = |offer_pool| StateChange::TokenMinted {
        contract: token,
        token_index: U256::from(9),
        owner: buyer,
        range_index: U256::from(1),
        offer_pool,
    };
    assert_eq!(apply(&registry, &classic), vec![minted(Some(U256::from(3)))]);
    assert_eq!(apply(&registry, &diamond), vec![minted(None)]);
}

#[test]
fn test_deprecated_minting_offer_defaults_to_visible() {
    let registry = EventRegistry::build().unwrap();
    let token = Address::repeat_byte(0x44);
    let record = build_record(
        "MintingOfferCreated(address,uint256,uint256,uint256)",
        vec![],
        encode_body(vec![DynSolValue::Address(token), uint(2), uint(6), uint(1)]),
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::OfferCreated {
            marketplace: emitter(),
            contract: token,
            key: OfferKey::Direct(U256::from(6)),
            range_index: U256::from(2),
            price: None,
            name: None,
            visible: true,
        }]
    );
}

#[test]
fn test_royalties_with_dynamic_arrays() {
    let registry = EventRegistry::build().unwrap();
    let token = Address::repeat_byte(0x44);
    let first = Address::repeat_byte(0x01);
    let second = Address::repeat_byte(0x02);

    let record = build_record(
        "RoyaltiesUpdated(address,address[],uint256[])",
        vec![address_to_topic(token)],
        encode_body(vec![
            DynSolValue::Array(vec![DynSolValue::Address(first), DynSolValue::Address(second)]),
            DynSolValue::Array(vec![uint(250), uint(100)]),
        ]),
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::RoyaltiesUpdated {
            contract: token,
            shares: vec![
                RoyaltyShare {
                    recipient: first,
                    percentage: U256::from(250),
                },
                RoyaltyShare {
                    recipient: second,
                    percentage: U256::from(100),
                },
            ],
        }]
    );
}

#[test]
fn test_credit_withdrawal_topics() {
    let registry = EventRegistry::build().unwrap();
    let user = Address::repeat_byte(0x0A);
    let token = Address::repeat_byte(0x0B);

    let record = build_record(
        "WithdrewCredit(address,address,uint256)",
        vec![address_to_topic(user), address_to_topic(token)],
        encode_body(vec![uint(1_000_000)]),
        emitter(),
    );

    assert_eq!(
        apply(&registry, &record),
        vec![StateChange::CreditWithdrawn {
            account: user,
            token,
            amount: U256::from(1_000_000),
        }]
    );
}

// ═══════════════════════════════════════════════════════════════════
//  Unhandled and malformed logs
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_diamond_cut_decodes_but_has_no_handler() {
    let registry = EventRegistry::build().unwrap();
    let facet = Address::repeat_byte(0xFA);
    let cut = DynSolValue::Tuple(vec![
        DynSolValue::Address(facet),
        DynSolValue::Uint(U256::from(0), 8),
        DynSolValue::Array(vec![DynSolValue::FixedBytes(
            B256::right_padding_from(&[0x12, 0x34, 0x56, 0x78]),
            4,
        )]),
    ]);
    let record = build_record(
        "DiamondCut((address,uint8,bytes4[])[],address,bytes)",
        vec![],
        encode_body(vec![
            DynSolValue::Array(vec![cut]),
            DynSolValue::Address(Address::ZERO),
            DynSolValue::Bytes(vec![]),
        ]),
        emitter(),
    );

    let entry = registry.get(&record.identifier).unwrap();
    assert_eq!(entry.handler, None);

    let decoded = decode_log(&entry.fragment, entry.generation, &record).unwrap();
    let json = decoded.to_json();
    assert_eq!(json["_diamondCut"][0][2][0], "0x12345678");
    assert_eq!(json["_calldata"], "0x");
}

#[test]
fn test_to_json_renders_big_integers_as_strings() {
    let registry = EventRegistry::build().unwrap();
    let amount = U256::from(10).pow(U256::from(30));
    let record = build_record(
        "ReceivedTokens(address,address,uint256)",
        vec![
            address_to_topic(Address::repeat_byte(0x0A)),
            address_to_topic(Address::repeat_byte(0x0B)),
        ],
        encode_body(vec![DynSolValue::Uint(amount, 256)]),
        emitter(),
    );

    let entry = registry.get(&record.identifier).unwrap();
    let decoded = decode_log(&entry.fragment, entry.generation, &record).unwrap();
    let json = decoded.to_json();
    assert_eq!(json["amountReceived"], "1000000000000000000000000000000");
    assert!(json["fromAddress"].as_str().unwrap().contains("0a0a0a"));
}

#[test]
fn test_truncated_body_is_malformed() {
    let registry = EventRegistry::build().unwrap();
    let mut data = encode_body(vec![DynSolValue::String("Genesis".into()), uint(1), uint(100)]);
    data.truncate(40);
    let record = build_record(
        "CreatedCollection(uint256,string,uint256,uint256)",
        vec![uint_topic(0)],
        data,
        emitter(),
    );

    let entry = registry.get(&record.identifier).unwrap();
    let err = decode_log(&entry.fragment, entry.generation, &record).unwrap_err();
    assert!(matches!(err, DecodeError::Abi { .. }), "unexpected error: {err}");
}

#[test]
fn test_missing_indexed_topic_is_malformed() {
    let registry = EventRegistry::build().unwrap();
    let record = build_record(
        "Transfer(address,address,uint256)",
        vec![address_to_topic(Address::repeat_byte(0x11))],
        vec![],
        emitter(),
    );

    let entry = registry.get(&record.identifier).unwrap();
    assert!(decode_log(&entry.fragment, entry.generation, &record).is_err());
}

#[test]
fn test_handler_names_are_stable() {
    assert_eq!(Handler::CreateCollection.to_string(), "create_collection");
    assert_eq!(Handler::MintToken.name(), "mint_token");
}

// ═══════════════════════════════════════════════════════════════════
//  Whole corpus
// ═══════════════════════════════════════════════════════════════════

/// Zero value of a Solidity type; dynamic types are empty.
fn zero_value(ty: &DynSolType) -> DynSolValue {
    match ty {
        DynSolType::Bool => DynSolValue::Bool(false),
        DynSolType::Int(size) => DynSolValue::Int(I256::ZERO, *size),
        DynSolType::Uint(size) => DynSolValue::Uint(U256::ZERO, *size),
        DynSolType::FixedBytes(size) => DynSolValue::FixedBytes(B256::ZERO, *size),
        DynSolType::Address => DynSolValue::Address(Address::ZERO),
        DynSolType::Bytes => DynSolValue::Bytes(Vec::new()),
        DynSolType::String => DynSolValue::String(String::new()),
        DynSolType::Array(_) => DynSolValue::Array(Vec::new()),
        DynSolType::FixedArray(inner, len) => DynSolValue::FixedArray(vec![zero_value(inner); *len]),
        DynSolType::Tuple(types) => DynSolValue::Tuple(types.iter().map(zero_value).collect()),
        other => panic!("no zero value for {other}"),
    }
}

#[test]
fn test_every_handled_event_applies_with_zero_arguments() {
    let registry = EventRegistry::build().unwrap();
    let mut handled = std::collections::BTreeSet::new();

    for entry in registry.entries().filter(|entry| entry.handler.is_some()) {
        let mut topics = Vec::new();
        let mut body = Vec::new();
        for param in &entry.fragment.inputs {
            let ty = param.resolve().unwrap();
            if param.indexed {
                // A zero word is a valid topic for value types and hashed ones alike.
                topics.push(B256::ZERO);
            } else {
                body.push(zero_value(&ty));
            }
        }

        let record = build_record(&entry.signature, topics, encode_body(body), emitter());
        let decoded = decode_log(&entry.fragment, entry.generation, &record)
            .unwrap_or_else(|e| panic!("{} does not decode: {e}", entry.signature));
        let handler = entry.handler.unwrap();
        let changes = handler
            .apply(&decoded, &record.meta())
            .unwrap_or_else(|e| panic!("{handler} rejects {}: {e}", entry.signature));
        assert!(!changes.is_empty(), "{} produced no changes", entry.signature);
        handled.insert(entry.name());
    }

    assert_eq!(handled, registry.handled_names());
    assert!(handled.contains("Transfer"));
}
