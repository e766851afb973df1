//! Idempotent apply layer.
//!
//! A store persists the ledger row of a log and every state change the log's
//! handler produced as one unit: either all of it lands or none of it does.
//! The ledger row is keyed by `(tx_hash, log_index)`, so a log that is
//! delivered twice mutates state once.

use std::future::Future;

use alloy::primitives::{Address, U256};
use mirror_common::types::{AppliedLog, LedgerKey, StateChange};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The ledger already held the key; nothing was written.
    AlreadyApplied,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A change refers to an entity of the same contract that does not exist
    /// yet, usually because an earlier log has not been applied.
    #[error("{change} for {key} requires {dependency}, which does not exist")]
    MissingDependency {
        key: LedgerKey,
        change: &'static str,
        dependency: String,
    },

    #[error("Withdrawal of {requested} by {account} exceeds credit balance {available} of token {token}")]
    InsufficientCredit {
        key: LedgerKey,
        account: Address,
        token: Address,
        available: U256,
        requested: U256,
    },

    #[error("Deposit of {deposited} for {account} overflows credit balance {available} of token {token}")]
    CreditOverflow {
        key: LedgerKey,
        account: Address,
        token: Address,
        available: U256,
        deposited: U256,
    },

    #[error("Stored value in {table} is not valid: {value}")]
    Corrupt { table: &'static str, value: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether applying the same log again later can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Corrupt { .. } | StoreError::CreditOverflow { .. })
    }
}

/// Persistence seam of the dispatcher.
pub trait StateStore: Send + Sync + 'static {
    fn is_applied(&self, key: &LedgerKey) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Insert the ledger row for `log` and apply `changes` in order, atomically.
    ///
    /// Returns [`ApplyOutcome::AlreadyApplied`] without touching state when a
    /// concurrent or earlier apply already recorded the key.
    fn apply(
        &self,
        log: &AppliedLog,
        changes: &[StateChange],
    ) -> impl Future<Output = Result<ApplyOutcome, StoreError>> + Send;
}

pub(crate) fn missing(log: &AppliedLog, change: &StateChange, dependency: String) -> StoreError {
    StoreError::MissingDependency {
        key: log.key(),
        change: change.collection(),
        dependency,
    }
}
