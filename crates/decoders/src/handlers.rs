//! Handler table: which state transition each mirrored event performs.
//!
//! Generations spell the same transition differently (`ProductCreated` on
//! classic contracts, `CreatedCollection` on diamonds), so several event names
//! map to one [`Handler`]. Argument names differ between fragments too; each
//! handler accepts every spelling the corpus uses.

use alloy::primitives::Address;
use mirror_common::types::{LogMeta, OfferKey, ResaleStatus, RoyaltyShare, StateChange};

use crate::decode::{DecodedLog, HandlerError};

const COLLECTION_INDEX: &[&str] = &["productIndex", "collectionIndex", "id"];
const COLLECTION_NAME: &[&str] = &["productName", "collectionName", "name"];
const COLLECTION_LENGTH: &[&str] = &["collectionLength", "length"];
const RANGE_INDEX: &[&str] = &["rangeIndex"];
const LOCK_INDEX: &[&str] = &["lockIndex", "rangeIndex"];
const LOCK_START: &[&str] = &["from", "startToken", "startingToken"];
const LOCK_END: &[&str] = &["to", "endToken", "endingToken"];
const LOCKED_TOKENS: &[&str] = &["lockedTokens", "tokensLocked"];
const TOKEN_CONTRACT: &[&str] = &["contractAddress", "erc721Address"];
const NEW_URI: &[&str] = &["newURI"];

/// Logical state transitions, one variant per mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    DeployContract,
    CreateCollection,
    CreateRange,
    UpdateRange,
    LockRange,
    UnlockRange,
    TransferToken,
    MintToken,
    UpdateTokenUri,
    UpdateCollectionUri,
    UpdateBaseUri,
    CreateOfferPool,
    AppendOffer,
    UpdateOffer,
    CreateMintingOffer,
    UpdateMintingOffer,
    CreateResaleOffer,
    CloseResaleOffer,
    CancelResaleOffer,
    UpdateRoyalties,
    DepositCredit,
    WithdrawCredit,
}

/// Resolve the handler bound to a Solidity event name.
///
/// Events without a handler (approvals, fee changes, diamond cuts...) are
/// still registered so their logs are recognised, but nothing is applied.
pub fn handler_for(event_name: &str) -> Option<Handler> {
    let handler = match event_name {
        "NewContractDeployed" | "deployedContract" => Handler::DeployContract,
        "ProductCreated" | "CreatedCollection" | "CollectionCreated" => Handler::CreateCollection,
        "RangeCreated" | "CreatedRange" => Handler::CreateRange,
        "RangeUpdated" | "UpdatedRange" => Handler::UpdateRange,
        "TradingLocked" | "LockedRange" | "RangeLocked" => Handler::LockRange,
        "TradingUnlocked" | "UnlockedRange" | "RangeUnlocked" => Handler::UnlockRange,
        "Transfer" => Handler::TransferToken,
        "TokenMinted" => Handler::MintToken,
        "TokenURIChanged" | "UpdatedTokenURI" => Handler::UpdateTokenUri,
        "ProductURIChanged" | "UpdatedProductURI" => Handler::UpdateCollectionUri,
        "BaseURIChanged" | "UpdatedBaseURI" => Handler::UpdateBaseUri,
        "AddedOffer" => Handler::CreateOfferPool,
        "AppendedRange" => Handler::AppendOffer,
        "UpdatedOffer" => Handler::UpdateOffer,
        "MintingOfferCreated" | "AddedMintingOffer" => Handler::CreateMintingOffer,
        "UpdatedMintingOffer" => Handler::UpdateMintingOffer,
        "ResaleOfferCreated" => Handler::CreateResaleOffer,
        "ResaleOfferClosed" => Handler::CloseResaleOffer,
        "ResaleOfferCancelled" => Handler::CancelResaleOffer,
        "RoyaltiesUpdated" => Handler::UpdateRoyalties,
        "ReceivedTokens" => Handler::DepositCredit,
        "WithdrewCredit" => Handler::WithdrawCredit,
        _ => return None,
    };
    Some(handler)
}

impl Handler {
    pub fn name(&self) -> &'static str {
        match self {
            Handler::DeployContract => "deploy_contract",
            Handler::CreateCollection => "create_collection",
            Handler::CreateRange => "create_range",
            Handler::UpdateRange => "update_range",
            Handler::LockRange => "lock_range",
            Handler::UnlockRange => "unlock_range",
            Handler::TransferToken => "transfer_token",
            Handler::MintToken => "mint_token",
            Handler::UpdateTokenUri => "update_token_uri",
            Handler::UpdateCollectionUri => "update_collection_uri",
            Handler::UpdateBaseUri => "update_base_uri",
            Handler::CreateOfferPool => "create_offer_pool",
            Handler::AppendOffer => "append_offer",
            Handler::UpdateOffer => "update_offer",
            Handler::CreateMintingOffer => "create_minting_offer",
            Handler::UpdateMintingOffer => "update_minting_offer",
            Handler::CreateResaleOffer => "create_resale_offer",
            Handler::CloseResaleOffer => "close_resale_offer",
            Handler::CancelResaleOffer => "cancel_resale_offer",
            Handler::UpdateRoyalties => "update_royalties",
            Handler::DepositCredit => "deposit_credit",
            Handler::WithdrawCredit => "withdraw_credit",
        }
    }

    /// Translate a decoded log into the state changes it implies.
    ///
    /// Pure: reads nothing from storage. Dependencies between changes (a range
    /// needs its collection) are checked when the changes are applied.
    pub fn apply(&self, log: &DecodedLog, meta: &LogMeta) -> Result<Vec<StateChange>, HandlerError> {
        let change = match self {
            Handler::DeployContract => StateChange::ContractDeployed {
                address: log.address(&["token", "contractAddress"])?,
                factory: meta.address,
                owner: log.address(&["owner"])?,
                name: log.string(&["contractName"])?,
                deployment_index: log.uint(&["id", "numberOfContracts"])?,
                generation: log.generation,
            },
            Handler::CreateCollection => StateChange::CollectionCreated {
                contract: meta.address,
                collection_index: log.uint(COLLECTION_INDEX)?,
                name: log.string(COLLECTION_NAME)?,
                starting_token: log.opt_uint(&["startingToken"])?,
                length: log.uint(COLLECTION_LENGTH)?,
            },
            Handler::CreateRange => StateChange::RangeCreated {
                contract: meta.address,
                collection_index: log.uint(COLLECTION_INDEX)?,
                range_index: log.uint(RANGE_INDEX)?,
                start: log.uint(&["start"])?,
                end: log.uint(&["end"])?,
                price: log.uint(&["price"])?,
                tokens_allowed: log.uint(&["tokensAllowed"])?,
                locked_tokens: log.uint(LOCKED_TOKENS)?,
                name: log.string(&["name"])?,
            },
            Handler::UpdateRange => StateChange::RangeUpdated {
                contract: meta.address,
                range_index: log.uint(RANGE_INDEX)?,
                name: log.opt_string(&["name"])?,
                price: log.uint(&["price"])?,
                tokens_allowed: log.uint(&["tokensAllowed"])?,
                locked_tokens: log.uint(LOCKED_TOKENS)?,
            },
            Handler::LockRange => StateChange::RangeLocked {
                contract: meta.address,
                lock_index: log.uint(LOCK_INDEX)?,
                // Only the deprecated lock event names the collection.
                collection_index: log.opt_uint(&["productIndex"])?,
                start: log.uint(LOCK_START)?,
                end: log.uint(LOCK_END)?,
                locked_tokens: log.uint(LOCKED_TOKENS)?,
            },
            Handler::UnlockRange => StateChange::RangeUnlocked {
                contract: meta.address,
                lock_index: log.uint(LOCK_INDEX)?,
            },
            Handler::TransferToken => StateChange::TokenTransferred {
                contract: meta.address,
                token_index: log.uint(&["tokenId"])?,
                from: log.address(&["from"])?,
                to: log.address(&["to"])?,
            },
            Handler::MintToken => StateChange::TokenMinted {
                contract: log.address(TOKEN_CONTRACT)?,
                token_index: log.uint(&["tokenIndex"])?,
                owner: log.address(&["ownerAddress", "buyer"])?,
                range_index: log.uint(RANGE_INDEX)?,
                offer_pool: log.opt_uint(&["catalogIndex"])?,
            },
            Handler::UpdateTokenUri => StateChange::TokenUriUpdated {
                contract: meta.address,
                token_index: log.uint(&["tokenId"])?,
                uri: log.string(NEW_URI)?,
            },
            Handler::UpdateCollectionUri => StateChange::CollectionUriUpdated {
                contract: meta.address,
                collection_index: log.uint(&["productId"])?,
                uri: log.string(NEW_URI)?,
            },
            Handler::UpdateBaseUri => StateChange::BaseUriUpdated {
                contract: meta.address,
                uri: log.string(NEW_URI)?,
            },
            Handler::CreateOfferPool => StateChange::OfferPoolCreated {
                marketplace: meta.address,
                contract: log.address(TOKEN_CONTRACT)?,
                pool_index: log.uint(&["catalogIndex"])?,
                collection_index: log.uint(COLLECTION_INDEX)?,
                ranges: log.uint(&["rangesCreated"])?,
            },
            Handler::AppendOffer => {
                let range_index = log.uint(RANGE_INDEX)?;
                StateChange::OfferCreated {
                    marketplace: meta.address,
                    contract: log.address(TOKEN_CONTRACT)?,
                    key: OfferKey::Pooled {
                        pool: log.uint(&["offerIndex"])?,
                        range: range_index,
                    },
                    range_index,
                    price: Some(log.uint(&["price"])?),
                    name: Some(log.string(&["name"])?),
                    visible: true,
                }
            }
            Handler::UpdateOffer => StateChange::OfferUpdated {
                marketplace: meta.address,
                key: OfferKey::Pooled {
                    pool: log.uint(&["offerIndex"])?,
                    range: log.uint(RANGE_INDEX)?,
                },
                price: Some(log.uint(&["price"])?),
                name: Some(log.string(&["name"])?),
                visible: None,
            },
            Handler::CreateMintingOffer => StateChange::OfferCreated {
                marketplace: meta.address,
                contract: log.address(TOKEN_CONTRACT)?,
                key: OfferKey::Direct(log.uint(&["offerIndex"])?),
                range_index: log.uint(RANGE_INDEX)?,
                price: log.opt_uint(&["price"])?,
                name: log.opt_string(&["rangeName"])?,
                visible: log.opt_boolean(&["visible"])?.unwrap_or(true),
            },
            Handler::UpdateMintingOffer => StateChange::OfferUpdated {
                marketplace: meta.address,
                key: OfferKey::Direct(log.uint(&["offerIndex"])?),
                price: None,
                name: None,
                visible: Some(log.boolean(&["visible"])?),
            },
            Handler::CreateResaleOffer => StateChange::ResaleOfferCreated {
                marketplace: meta.address,
                offer_index: log.uint(&["offerIndex"])?,
                contract: log.address(&["contractAddress"])?,
                seller: log.address(&["seller"])?,
                token_index: log.uint(&["tokenIndex"])?,
                price: log.uint(&["price"])?,
            },
            Handler::CloseResaleOffer => StateChange::ResaleOfferClosed {
                marketplace: meta.address,
                offer_index: log.uint(&["offerIndex"])?,
                status: ResaleStatus::Sold,
                buyer: Some(log.address(&["buyer"])?),
            },
            Handler::CancelResaleOffer => StateChange::ResaleOfferClosed {
                marketplace: meta.address,
                offer_index: log.uint(&["offerIndex"])?,
                status: ResaleStatus::Cancelled,
                buyer: None,
            },
            Handler::UpdateRoyalties => StateChange::RoyaltiesUpdated {
                contract: log.address(&["contractAddress"])?,
                shares: royalty_shares(log)?,
            },
            Handler::DepositCredit => StateChange::CreditDeposited {
                account: log.address(&["fromAddress"])?,
                token: log.address(&["tokenAddress"])?,
                amount: log.uint(&["amountReceived"])?,
            },
            Handler::WithdrawCredit => StateChange::CreditWithdrawn {
                account: log.address(&["userAddress"])?,
                token: log.address(&["tokenAddress"])?,
                amount: log.uint(&["amountWithdrawn"])?,
            },
        };
        Ok(vec![change])
    }
}

impl std::fmt::Display for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn royalty_shares(log: &DecodedLog) -> Result<Vec<RoyaltyShare>, HandlerError> {
    let recipients: Vec<Address> = log.address_array(&["recipients"])?;
    let percentages = log.uint_array(&["percentages"])?;
    if recipients.len() != percentages.len() {
        return Err(log.invalid(format!(
            "{} royalty recipients but {} percentages",
            recipients.len(),
            percentages.len()
        )));
    }
    Ok(recipients
        .into_iter()
        .zip(percentages)
        .map(|(recipient, percentage)| RoyaltyShare {
            recipient,
            percentage,
        })
        .collect())
}
