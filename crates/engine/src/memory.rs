//! In-process [`StateStore`] used by tests and local tooling.
//!
//! All state sits behind one mutex. Before a change writes an entry, the
//! entry's previous value is pushed to an undo journal; when a later change of
//! the same log fails, the journal is replayed backwards so nothing is left
//! behind.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use alloy::primitives::{Address, U256};
use tokio::sync::Mutex;

use mirror_common::types::{
    AppliedLog, Generation, LedgerKey, OfferKey, ResaleStatus, RoyaltyShare, StateChange,
};

use crate::store::{ApplyOutcome, StateStore, StoreError, missing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub factory: Address,
    pub owner: Address,
    pub name: String,
    pub deployment_index: U256,
    pub generation: Generation,
    pub deployed_block: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractRecord {
    pub deployment: Option<Deployment>,
    pub base_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub name: String,
    pub starting_token: Option<U256>,
    pub length: U256,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    pub collection_index: U256,
    pub start: U256,
    pub end: U256,
    pub price: U256,
    pub tokens_allowed: U256,
    pub locked_tokens: U256,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub collection_index: Option<U256>,
    pub start: U256,
    pub end: U256,
    pub locked_tokens: U256,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRecord {
    pub owner: Option<Address>,
    /// Position of the log that last set `owner`.
    pub owner_position: Option<(u64, u64)>,
    pub range_index: Option<U256>,
    pub offer_pool: Option<U256>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferPoolRecord {
    pub contract: Address,
    pub collection_index: U256,
    pub ranges: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferRecord {
    pub contract: Address,
    pub range_index: U256,
    pub price: Option<U256>,
    pub name: Option<String>,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResaleOfferRecord {
    pub contract: Address,
    pub seller: Address,
    pub token_index: U256,
    pub price: U256,
    pub status: ResaleStatus,
    pub buyer: Option<Address>,
}

#[derive(Debug, Default)]
struct MirrorState {
    applied: HashSet<LedgerKey>,
    contracts: HashMap<Address, ContractRecord>,
    collections: HashMap<(Address, U256), CollectionRecord>,
    ranges: HashMap<(Address, U256), RangeRecord>,
    locks: HashMap<(Address, U256), LockRecord>,
    tokens: HashMap<(Address, U256), TokenRecord>,
    offer_pools: HashMap<(Address, U256), OfferPoolRecord>,
    offers: HashMap<(Address, OfferKey), OfferRecord>,
    resale_offers: HashMap<(Address, U256), ResaleOfferRecord>,
    royalties: HashMap<Address, Vec<RoyaltyShare>>,
    credit: HashMap<(Address, Address), U256>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MirrorState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn applied_count(&self) -> usize {
        self.state.lock().await.applied.len()
    }

    pub async fn contract(&self, address: Address) -> Option<ContractRecord> {
        self.state.lock().await.contracts.get(&address).cloned()
    }

    pub async fn collection(&self, contract: Address, index: U256) -> Option<CollectionRecord> {
        self.state.lock().await.collections.get(&(contract, index)).cloned()
    }

    pub async fn range(&self, contract: Address, index: U256) -> Option<RangeRecord> {
        self.state.lock().await.ranges.get(&(contract, index)).cloned()
    }

    pub async fn lock_record(&self, contract: Address, index: U256) -> Option<LockRecord> {
        self.state.lock().await.locks.get(&(contract, index)).cloned()
    }

    pub async fn token(&self, contract: Address, index: U256) -> Option<TokenRecord> {
        self.state.lock().await.tokens.get(&(contract, index)).cloned()
    }

    pub async fn offer_pool(&self, marketplace: Address, index: U256) -> Option<OfferPoolRecord> {
        self.state.lock().await.offer_pools.get(&(marketplace, index)).cloned()
    }

    pub async fn offer(&self, marketplace: Address, key: OfferKey) -> Option<OfferRecord> {
        self.state.lock().await.offers.get(&(marketplace, key)).cloned()
    }

    pub async fn resale_offer(&self, marketplace: Address, index: U256) -> Option<ResaleOfferRecord> {
        self.state.lock().await.resale_offers.get(&(marketplace, index)).cloned()
    }

    pub async fn royalties(&self, contract: Address) -> Vec<RoyaltyShare> {
        self.state
            .lock()
            .await
            .royalties
            .get(&contract)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn credit_balance(&self, account: Address, token: Address) -> U256 {
        self.state
            .lock()
            .await
            .credit
            .get(&(account, token))
            .copied()
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStore {
    async fn is_applied(&self, key: &LedgerKey) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.applied.contains(key))
    }

    async fn apply(&self, log: &AppliedLog, changes: &[StateChange]) -> Result<ApplyOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.applied.contains(&log.key()) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let mut journal = Vec::with_capacity(changes.len());
        for change in changes {
            journal.push(state.snapshot(change));
            if let Err(err) = state.apply_change(log, change) {
                while let Some(undo) = journal.pop() {
                    state.restore(undo);
                }
                return Err(err);
            }
        }
        state.applied.insert(log.key());

        tracing::trace!(key = %log.key(), event = %log.event, changes = changes.len(), "Applied log in memory");
        Ok(ApplyOutcome::Applied)
    }
}

/// Previous value of the single entry a change writes.
#[derive(Debug)]
enum Undo {
    Contract(Address, Option<ContractRecord>),
    Collection((Address, U256), Option<CollectionRecord>),
    Range((Address, U256), Option<RangeRecord>),
    Lock((Address, U256), Option<LockRecord>),
    Token((Address, U256), Option<TokenRecord>),
    OfferPool((Address, U256), Option<OfferPoolRecord>),
    Offer((Address, OfferKey), Option<OfferRecord>),
    ResaleOffer((Address, U256), Option<ResaleOfferRecord>),
    Royalties(Address, Option<Vec<RoyaltyShare>>),
    Credit((Address, Address), Option<U256>),
}

fn put_back<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl MirrorState {
    fn snapshot(&self, change: &StateChange) -> Undo {
        match change {
            StateChange::ContractDeployed { address, .. } => {
                Undo::Contract(*address, self.contracts.get(address).cloned())
            }
            StateChange::BaseUriUpdated { contract, .. } => {
                Undo::Contract(*contract, self.contracts.get(contract).cloned())
            }
            StateChange::CollectionCreated {
                contract,
                collection_index,
                ..
            }
            | StateChange::CollectionUriUpdated {
                contract,
                collection_index,
                ..
            } => {
                let key = (*contract, *collection_index);
                Undo::Collection(key, self.collections.get(&key).cloned())
            }
            StateChange::RangeCreated {
                contract,
                range_index,
                ..
            }
            | StateChange::RangeUpdated {
                contract,
                range_index,
                ..
            } => {
                let key = (*contract, *range_index);
                Undo::Range(key, self.ranges.get(&key).cloned())
            }
            StateChange::RangeLocked {
                contract,
                lock_index,
                ..
            }
            | StateChange::RangeUnlocked {
                contract,
                lock_index,
            } => {
                let key = (*contract, *lock_index);
                Undo::Lock(key, self.locks.get(&key).cloned())
            }
            StateChange::TokenTransferred {
                contract,
                token_index,
                ..
            }
            | StateChange::TokenMinted {
                contract,
                token_index,
                ..
            }
            | StateChange::TokenUriUpdated {
                contract,
                token_index,
                ..
            } => {
                let key = (*contract, *token_index);
                Undo::Token(key, self.tokens.get(&key).cloned())
            }
            StateChange::OfferPoolCreated {
                marketplace,
                pool_index,
                ..
            } => {
                let key = (*marketplace, *pool_index);
                Undo::OfferPool(key, self.offer_pools.get(&key).cloned())
            }
            StateChange::OfferCreated { marketplace, key, .. }
            | StateChange::OfferUpdated { marketplace, key, .. } => {
                let key = (*marketplace, *key);
                Undo::Offer(key, self.offers.get(&key).cloned())
            }
            StateChange::ResaleOfferCreated {
                marketplace,
                offer_index,
                ..
            }
            | StateChange::ResaleOfferClosed {
                marketplace,
                offer_index,
                ..
            } => {
                let key = (*marketplace, *offer_index);
                Undo::ResaleOffer(key, self.resale_offers.get(&key).cloned())
            }
            StateChange::RoyaltiesUpdated { contract, .. } => {
                Undo::Royalties(*contract, self.royalties.get(contract).cloned())
            }
            StateChange::CreditDeposited { account, token, .. }
            | StateChange::CreditWithdrawn { account, token, .. } => {
                let key = (*account, *token);
                Undo::Credit(key, self.credit.get(&key).copied())
            }
        }
    }

    fn restore(&mut self, undo: Undo) {
        match undo {
            Undo::Contract(key, previous) => put_back(&mut self.contracts, key, previous),
            Undo::Collection(key, previous) => put_back(&mut self.collections, key, previous),
            Undo::Range(key, previous) => put_back(&mut self.ranges, key, previous),
            Undo::Lock(key, previous) => put_back(&mut self.locks, key, previous),
            Undo::Token(key, previous) => put_back(&mut self.tokens, key, previous),
            Undo::OfferPool(key, previous) => put_back(&mut self.offer_pools, key, previous),
            Undo::Offer(key, previous) => put_back(&mut self.offers, key, previous),
            Undo::ResaleOffer(key, previous) => put_back(&mut self.resale_offers, key, previous),
            Undo::Royalties(key, previous) => put_back(&mut self.royalties, key, previous),
            Undo::Credit(key, previous) => put_back(&mut self.credit, key, previous),
        }
    }

    fn apply_change(&mut self, log: &AppliedLog, change: &StateChange) -> Result<(), StoreError> {
        let position = log.meta.position();
        match change {
            StateChange::ContractDeployed {
                address,
                factory,
                owner,
                name,
                deployment_index,
                generation,
            } => {
                self.contracts.entry(*address).or_default().deployment = Some(Deployment {
                    factory: *factory,
                    owner: *owner,
                    name: name.clone(),
                    deployment_index: *deployment_index,
                    generation: *generation,
                    deployed_block: log.meta.block_number,
                });
            }
            StateChange::BaseUriUpdated { contract, uri } => {
                self.contracts.entry(*contract).or_default().base_uri = Some(uri.clone());
            }
            StateChange::CollectionCreated {
                contract,
                collection_index,
                name,
                starting_token,
                length,
            } => {
                let uri = self
                    .collections
                    .get(&(*contract, *collection_index))
                    .and_then(|existing| existing.uri.clone());
                self.collections.insert(
                    (*contract, *collection_index),
                    CollectionRecord {
                        name: name.clone(),
                        starting_token: *starting_token,
                        length: *length,
                        uri,
                    },
                );
            }
            StateChange::CollectionUriUpdated {
                contract,
                collection_index,
                uri,
            } => {
                let collection = self
                    .collections
                    .get_mut(&(*contract, *collection_index))
                    .ok_or_else(|| missing(log, change, format!("collection {collection_index}")))?;
                collection.uri = Some(uri.clone());
            }
            StateChange::RangeCreated {
                contract,
                collection_index,
                range_index,
                start,
                end,
                price,
                tokens_allowed,
                locked_tokens,
                name,
            } => {
                if !self.collections.contains_key(&(*contract, *collection_index)) {
                    return Err(missing(log, change, format!("collection {collection_index}")));
                }
                self.ranges.insert(
                    (*contract, *range_index),
                    RangeRecord {
                        collection_index: *collection_index,
                        start: *start,
                        end: *end,
                        price: *price,
                        tokens_allowed: *tokens_allowed,
                        locked_tokens: *locked_tokens,
                        name: name.clone(),
                    },
                );
            }
            StateChange::RangeUpdated {
                contract,
                range_index,
                name,
                price,
                tokens_allowed,
                locked_tokens,
            } => {
                let range = self
                    .ranges
                    .get_mut(&(*contract, *range_index))
                    .ok_or_else(|| missing(log, change, format!("range {range_index}")))?;
                if let Some(name) = name {
                    range.name = name.clone();
                }
                range.price = *price;
                range.tokens_allowed = *tokens_allowed;
                range.locked_tokens = *locked_tokens;
            }
            StateChange::RangeLocked {
                contract,
                lock_index,
                collection_index,
                start,
                end,
                locked_tokens,
            } => {
                match collection_index {
                    Some(collection) if !self.collections.contains_key(&(*contract, *collection)) => {
                        return Err(missing(log, change, format!("collection {collection}")));
                    }
                    None if !self.ranges.contains_key(&(*contract, *lock_index)) => {
                        return Err(missing(log, change, format!("range {lock_index}")));
                    }
                    _ => {}
                }
                self.locks.insert(
                    (*contract, *lock_index),
                    LockRecord {
                        collection_index: *collection_index,
                        start: *start,
                        end: *end,
                        locked_tokens: *locked_tokens,
                        active: true,
                    },
                );
            }
            StateChange::RangeUnlocked {
                contract,
                lock_index,
            } => {
                let lock = self
                    .locks
                    .get_mut(&(*contract, *lock_index))
                    .ok_or_else(|| missing(log, change, format!("lock {lock_index}")))?;
                lock.active = false;
            }
            StateChange::TokenTransferred {
                contract,
                token_index,
                to,
                ..
            } => {
                self.tokens
                    .entry((*contract, *token_index))
                    .or_default()
                    .set_owner(*to, position);
            }
            StateChange::TokenMinted {
                contract,
                token_index,
                owner,
                range_index,
                offer_pool,
            } => {
                let token = self.tokens.entry((*contract, *token_index)).or_default();
                token.range_index = Some(*range_index);
                token.offer_pool = *offer_pool;
                token.set_owner(*owner, position);
            }
            StateChange::TokenUriUpdated {
                contract,
                token_index,
                uri,
            } => {
                self.tokens.entry((*contract, *token_index)).or_default().uri = Some(uri.clone());
            }
            StateChange::OfferPoolCreated {
                marketplace,
                contract,
                pool_index,
                collection_index,
                ranges,
            } => {
                self.offer_pools.insert(
                    (*marketplace, *pool_index),
                    OfferPoolRecord {
                        contract: *contract,
                        collection_index: *collection_index,
                        ranges: *ranges,
                    },
                );
            }
            StateChange::OfferCreated {
                marketplace,
                contract,
                key,
                range_index,
                price,
                name,
                visible,
            } => {
                if let Some(pool) = key.pool() {
                    if !self.offer_pools.contains_key(&(*marketplace, pool)) {
                        return Err(missing(log, change, format!("offer pool {pool}")));
                    }
                }
                self.offers.insert(
                    (*marketplace, *key),
                    OfferRecord {
                        contract: *contract,
                        range_index: *range_index,
                        price: *price,
                        name: name.clone(),
                        visible: *visible,
                    },
                );
            }
            StateChange::OfferUpdated {
                marketplace,
                key,
                price,
                name,
                visible,
            } => {
                let offer = self
                    .offers
                    .get_mut(&(*marketplace, *key))
                    .ok_or_else(|| missing(log, change, format!("offer {key}")))?;
                if price.is_some() {
                    offer.price = *price;
                }
                if name.is_some() {
                    offer.name = name.clone();
                }
                if let Some(visible) = visible {
                    offer.visible = *visible;
                }
            }
            StateChange::ResaleOfferCreated {
                marketplace,
                offer_index,
                contract,
                seller,
                token_index,
                price,
            } => {
                self.resale_offers.insert(
                    (*marketplace, *offer_index),
                    ResaleOfferRecord {
                        contract: *contract,
                        seller: *seller,
                        token_index: *token_index,
                        price: *price,
                        status: ResaleStatus::Open,
                        buyer: None,
                    },
                );
            }
            StateChange::ResaleOfferClosed {
                marketplace,
                offer_index,
                status,
                buyer,
            } => {
                let offer = self
                    .resale_offers
                    .get_mut(&(*marketplace, *offer_index))
                    .ok_or_else(|| missing(log, change, format!("resale offer {offer_index}")))?;
                offer.status = *status;
                offer.buyer = *buyer;
            }
            StateChange::RoyaltiesUpdated { contract, shares } => {
                self.royalties.insert(*contract, shares.clone());
            }
            StateChange::CreditDeposited {
                account,
                token,
                amount,
            } => {
                let available = self.credit.get(&(*account, *token)).copied().unwrap_or_default();
                let balance = available.checked_add(*amount).ok_or(StoreError::CreditOverflow {
                    key: log.key(),
                    account: *account,
                    token: *token,
                    available,
                    deposited: *amount,
                })?;
                self.credit.insert((*account, *token), balance);
            }
            StateChange::CreditWithdrawn {
                account,
                token,
                amount,
            } => {
                let available = self.credit.get(&(*account, *token)).copied().unwrap_or_default();
                let remaining = available.checked_sub(*amount).ok_or(StoreError::InsufficientCredit {
                    key: log.key(),
                    account: *account,
                    token: *token,
                    available,
                    requested: *amount,
                })?;
                self.credit.insert((*account, *token), remaining);
            }
        }
        Ok(())
    }
}

impl TokenRecord {
    /// Last writer by chain position wins: transfers and marketplace mints
    /// come from different contracts and may be applied out of order.
    fn set_owner(&mut self, owner: Address, position: (u64, u64)) {
        if self.owner_position.is_none_or(|current| current < position) {
            self.owner = Some(owner);
            self.owner_position = Some(position);
        }
    }
}
