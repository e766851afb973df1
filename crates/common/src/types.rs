use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Contract schema generation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Classic,
    Diamond,
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Classic => write!(f, "classic"),
            Generation::Diamond => write!(f, "diamond"),
        }
    }
}

/// A raw log as delivered by the chain-sync driver.
///
/// `identifier` is topic0; `topics` holds the remaining indexed words in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub identifier: B256,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl LogRecord {
    /// Position of the record inside the chain. Records from one contract
    /// must be applied in ascending order of this key.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn meta(&self) -> LogMeta {
        LogMeta {
            address: self.address,
            block_number: self.block_number,
            log_index: self.log_index,
            tx_hash: self.tx_hash,
        }
    }

    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Log metadata handed to handlers alongside the decoded arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMeta {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl LogMeta {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Idempotency key of the applied-log ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}:{}", self.tx_hash, self.log_index)
    }
}

/// Ledger row written together with the state mutations of a log.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedLog {
    pub meta: LogMeta,
    /// Event name of the registry entry that matched.
    pub event: String,
    /// Decoded arguments, kept for auditing.
    pub args: serde_json::Value,
}

impl AppliedLog {
    pub fn key(&self) -> LedgerKey {
        self.meta.ledger_key()
    }
}

/// Identifies an offer on a minting marketplace.
///
/// Classic minters group offers into pools (catalog entries) and address a
/// single range inside the pool; diamond marketplaces number offers directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OfferKey {
    Pooled { pool: U256, range: U256 },
    Direct(U256),
}

impl OfferKey {
    /// Offer pool this key depends on, if any.
    pub fn pool(&self) -> Option<U256> {
        match self {
            OfferKey::Pooled { pool, .. } => Some(*pool),
            OfferKey::Direct(_) => None,
        }
    }
}

impl std::fmt::Display for OfferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferKey::Pooled { pool, range } => write!(f, "{pool}-{range}"),
            OfferKey::Direct(index) => write!(f, "{index}"),
        }
    }
}

/// Lifecycle of a resale offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResaleStatus {
    Open,
    Sold,
    Cancelled,
}

impl std::fmt::Display for ResaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResaleStatus::Open => write!(f, "open"),
            ResaleStatus::Sold => write!(f, "sold"),
            ResaleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One royalty recipient and its share as reported by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoyaltyShare {
    pub recipient: Address,
    pub percentage: U256,
}

/// A single mutation of the persisted mirror requested by a handler.
///
/// Handlers only describe changes; the apply layer executes all changes of a
/// log together with its ledger row.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    ContractDeployed {
        address: Address,
        factory: Address,
        owner: Address,
        name: String,
        deployment_index: U256,
        generation: Generation,
    },
    CollectionCreated {
        contract: Address,
        collection_index: U256,
        name: String,
        starting_token: Option<U256>,
        length: U256,
    },
    RangeCreated {
        contract: Address,
        collection_index: U256,
        range_index: U256,
        start: U256,
        end: U256,
        price: U256,
        tokens_allowed: U256,
        locked_tokens: U256,
        name: String,
    },
    RangeUpdated {
        contract: Address,
        range_index: U256,
        name: Option<String>,
        price: U256,
        tokens_allowed: U256,
        locked_tokens: U256,
    },
    /// `collection_index` is set by generations that lock slices of a
    /// collection; otherwise the lock covers the range `lock_index`.
    RangeLocked {
        contract: Address,
        lock_index: U256,
        collection_index: Option<U256>,
        start: U256,
        end: U256,
        locked_tokens: U256,
    },
    RangeUnlocked {
        contract: Address,
        lock_index: U256,
    },
    TokenTransferred {
        contract: Address,
        token_index: U256,
        from: Address,
        to: Address,
    },
    TokenMinted {
        contract: Address,
        token_index: U256,
        owner: Address,
        range_index: U256,
        offer_pool: Option<U256>,
    },
    TokenUriUpdated {
        contract: Address,
        token_index: U256,
        uri: String,
    },
    CollectionUriUpdated {
        contract: Address,
        collection_index: U256,
        uri: String,
    },
    BaseUriUpdated {
        contract: Address,
        uri: String,
    },
    OfferPoolCreated {
        marketplace: Address,
        contract: Address,
        pool_index: U256,
        collection_index: U256,
        ranges: U256,
    },
    OfferCreated {
        marketplace: Address,
        contract: Address,
        key: OfferKey,
        range_index: U256,
        price: Option<U256>,
        name: Option<String>,
        visible: bool,
    },
    OfferUpdated {
        marketplace: Address,
        key: OfferKey,
        price: Option<U256>,
        name: Option<String>,
        visible: Option<bool>,
    },
    ResaleOfferCreated {
        marketplace: Address,
        offer_index: U256,
        contract: Address,
        seller: Address,
        token_index: U256,
        price: U256,
    },
    ResaleOfferClosed {
        marketplace: Address,
        offer_index: U256,
        status: ResaleStatus,
        buyer: Option<Address>,
    },
    RoyaltiesUpdated {
        contract: Address,
        shares: Vec<RoyaltyShare>,
    },
    CreditDeposited {
        account: Address,
        token: Address,
        amount: U256,
    },
    CreditWithdrawn {
        account: Address,
        token: Address,
        amount: U256,
    },
}

impl StateChange {
    /// Name of the persisted collection this change writes to.
    pub fn collection(&self) -> &'static str {
        match self {
            StateChange::ContractDeployed { .. } | StateChange::BaseUriUpdated { .. } => {
                "contracts"
            }
            StateChange::CollectionCreated { .. } | StateChange::CollectionUriUpdated { .. } => {
                "collections"
            }
            StateChange::RangeCreated { .. } | StateChange::RangeUpdated { .. } => "ranges",
            StateChange::RangeLocked { .. } | StateChange::RangeUnlocked { .. } => "locks",
            StateChange::TokenTransferred { .. }
            | StateChange::TokenMinted { .. }
            | StateChange::TokenUriUpdated { .. } => "tokens",
            StateChange::OfferPoolCreated { .. } => "offer_pools",
            StateChange::OfferCreated { .. } | StateChange::OfferUpdated { .. } => "offers",
            StateChange::ResaleOfferCreated { .. } | StateChange::ResaleOfferClosed { .. } => {
                "resale_offers"
            }
            StateChange::RoyaltiesUpdated { .. } => "royalties",
            StateChange::CreditDeposited { .. } | StateChange::CreditWithdrawn { .. } => {
                "credit_ledger"
            }
        }
    }
}
