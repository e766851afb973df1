//! PostgreSQL-backed [`StateStore`].
//!
//! Each log is applied inside one transaction. The ledger row goes in first
//! with `ON CONFLICT DO NOTHING`; when no row was inserted another worker (or
//! an earlier run) already applied the log and the transaction is dropped.

use alloy::primitives::{Address, U256};
use sqlx::{PgConnection, PgPool};

use mirror_common::types::{AppliedLog, LedgerKey, OfferKey, StateChange};

use crate::store::{ApplyOutcome, StateStore, StoreError, missing};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn hex(address: &Address) -> String {
    format!("{:#x}", address)
}

impl StateStore for PgStore {
    async fn is_applied(&self, key: &LedgerKey) -> Result<bool, StoreError> {
        let applied: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM applied_logs WHERE tx_hash = $1 AND log_index = $2)",
        )
        .bind(format!("{:#x}", key.tx_hash))
        .bind(key.log_index as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(applied)
    }

    async fn apply(&self, log: &AppliedLog, changes: &[StateChange]) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO applied_logs (tx_hash, log_index, block_number, address, event, args)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(format!("{:#x}", log.meta.tx_hash))
        .bind(log.meta.log_index as i64)
        .bind(log.meta.block_number as i64)
        .bind(hex(&log.meta.address))
        .bind(&log.event)
        .bind(&log.args)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        // Any error below drops `tx`, which rolls back the ledger row too.
        for change in changes {
            apply_change(&mut *tx, log, change).await?;
            tracing::trace!(key = %log.key(), table = change.collection(), "Applied change");
        }

        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }
}

async fn exists(conn: &mut PgConnection, sql: &str, owner: &Address, index: &U256) -> Result<bool, StoreError> {
    let found: bool = sqlx::query_scalar(sql)
        .bind(hex(owner))
        .bind(index.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(found)
}

async fn apply_change(conn: &mut PgConnection, log: &AppliedLog, change: &StateChange) -> Result<(), StoreError> {
    let block = log.meta.block_number as i64;
    let log_index = log.meta.log_index as i64;

    match change {
        StateChange::ContractDeployed {
            address,
            factory,
            owner,
            name,
            deployment_index,
            generation,
        } => {
            sqlx::query(
                r#"
                INSERT INTO contracts (address, factory, owner, name, deployment_index, generation, deployed_block)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (address) DO UPDATE SET
                    factory = EXCLUDED.factory,
                    owner = EXCLUDED.owner,
                    name = EXCLUDED.name,
                    deployment_index = EXCLUDED.deployment_index,
                    generation = EXCLUDED.generation,
                    deployed_block = EXCLUDED.deployed_block,
                    updated_at = now()
                "#,
            )
            .bind(hex(address))
            .bind(hex(factory))
            .bind(hex(owner))
            .bind(name)
            .bind(deployment_index.to_string())
            .bind(generation.to_string())
            .bind(block)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::BaseUriUpdated { contract, uri } => {
            sqlx::query(
                r#"
                INSERT INTO contracts (address, base_uri) VALUES ($1, $2)
                ON CONFLICT (address) DO UPDATE SET base_uri = EXCLUDED.base_uri, updated_at = now()
                "#,
            )
            .bind(hex(contract))
            .bind(uri)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::CollectionCreated {
            contract,
            collection_index,
            name,
            starting_token,
            length,
        } => {
            sqlx::query(
                r#"
                INSERT INTO collections (contract, collection_index, name, starting_token, length, created_block)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (contract, collection_index) DO UPDATE SET
                    name = EXCLUDED.name,
                    starting_token = EXCLUDED.starting_token,
                    length = EXCLUDED.length
                "#,
            )
            .bind(hex(contract))
            .bind(collection_index.to_string())
            .bind(name)
            .bind(starting_token.map(|t| t.to_string()))
            .bind(length.to_string())
            .bind(block)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::CollectionUriUpdated {
            contract,
            collection_index,
            uri,
        } => {
            let updated = sqlx::query(
                "UPDATE collections SET uri = $3 WHERE contract = $1 AND collection_index = $2",
            )
            .bind(hex(contract))
            .bind(collection_index.to_string())
            .bind(uri)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(missing(log, change, format!("collection {collection_index}")));
            }
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
            let has_collection = exists(
                conn,
                "SELECT EXISTS(SELECT 1 FROM collections WHERE contract = $1 AND collection_index = $2)",
                contract,
                collection_index,
            )
            .await?;
            if !has_collection {
                return Err(missing(log, change, format!("collection {collection_index}")));
            }
            sqlx::query(
                r#"
                INSERT INTO ranges (contract, range_index, collection_index, start_token, end_token,
                                    price, tokens_allowed, locked_tokens, name)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (contract, range_index) DO UPDATE SET
                    collection_index = EXCLUDED.collection_index,
                    start_token = EXCLUDED.start_token,
                    end_token = EXCLUDED.end_token,
                    price = EXCLUDED.price,
                    tokens_allowed = EXCLUDED.tokens_allowed,
                    locked_tokens = EXCLUDED.locked_tokens,
                    name = EXCLUDED.name
                "#,
            )
            .bind(hex(contract))
            .bind(range_index.to_string())
            .bind(collection_index.to_string())
            .bind(start.to_string())
            .bind(end.to_string())
            .bind(price.to_string())
            .bind(tokens_allowed.to_string())
            .bind(locked_tokens.to_string())
            .bind(name)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::RangeUpdated {
            contract,
            range_index,
            name,
            price,
            tokens_allowed,
            locked_tokens,
        } => {
            let updated = sqlx::query(
                r#"
                UPDATE ranges SET
                    name = COALESCE($3, name),
                    price = $4,
                    tokens_allowed = $5,
                    locked_tokens = $6
                WHERE contract = $1 AND range_index = $2
                "#,
            )
            .bind(hex(contract))
            .bind(range_index.to_string())
            .bind(name.as_deref())
            .bind(price.to_string())
            .bind(tokens_allowed.to_string())
            .bind(locked_tokens.to_string())
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(missing(log, change, format!("range {range_index}")));
            }
        }
        StateChange::RangeLocked {
            contract,
            lock_index,
            collection_index,
            start,
            end,
            locked_tokens,
        } => {
            let (present, dependency) = match collection_index {
                Some(collection) => (
                    exists(
                        conn,
                        "SELECT EXISTS(SELECT 1 FROM collections WHERE contract = $1 AND collection_index = $2)",
                        contract,
                        collection,
                    )
                    .await?,
                    format!("collection {collection}"),
                ),
                None => (
                    exists(
                        conn,
                        "SELECT EXISTS(SELECT 1 FROM ranges WHERE contract = $1 AND range_index = $2)",
                        contract,
                        lock_index,
                    )
                    .await?,
                    format!("range {lock_index}"),
                ),
            };
            if !present {
                return Err(missing(log, change, dependency));
            }
            sqlx::query(
                r#"
                INSERT INTO locks (contract, lock_index, collection_index, start_token, end_token, locked_tokens, active)
                VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                ON CONFLICT (contract, lock_index) DO UPDATE SET
                    collection_index = EXCLUDED.collection_index,
                    start_token = EXCLUDED.start_token,
                    end_token = EXCLUDED.end_token,
                    locked_tokens = EXCLUDED.locked_tokens,
                    active = TRUE
                "#,
            )
            .bind(hex(contract))
            .bind(lock_index.to_string())
            .bind(collection_index.map(|c| c.to_string()))
            .bind(start.to_string())
            .bind(end.to_string())
            .bind(locked_tokens.to_string())
            .execute(&mut *conn)
            .await?;
        }
        StateChange::RangeUnlocked {
            contract,
            lock_index,
        } => {
            let updated = sqlx::query(
                "UPDATE locks SET active = FALSE WHERE contract = $1 AND lock_index = $2",
            )
            .bind(hex(contract))
            .bind(lock_index.to_string())
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(missing(log, change, format!("lock {lock_index}")));
            }
        }
        StateChange::TokenTransferred {
            contract,
            token_index,
            to,
            ..
        } => {
            upsert_owner(conn, contract, token_index, to, block, log_index).await?;
        }
        StateChange::TokenMinted {
            contract,
            token_index,
            owner,
            range_index,
            offer_pool,
        } => {
            upsert_owner(conn, contract, token_index, owner, block, log_index).await?;
            sqlx::query(
                "UPDATE tokens SET range_index = $3, offer_pool = $4 WHERE contract = $1 AND token_index = $2",
            )
            .bind(hex(contract))
            .bind(token_index.to_string())
            .bind(range_index.to_string())
            .bind(offer_pool.map(|p| p.to_string()))
            .execute(&mut *conn)
            .await?;
        }
        StateChange::TokenUriUpdated {
            contract,
            token_index,
            uri,
        } => {
            sqlx::query(
                r#"
                INSERT INTO tokens (contract, token_index, uri) VALUES ($1, $2, $3)
                ON CONFLICT (contract, token_index) DO UPDATE SET uri = EXCLUDED.uri
                "#,
            )
            .bind(hex(contract))
            .bind(token_index.to_string())
            .bind(uri)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::OfferPoolCreated {
            marketplace,
            contract,
            pool_index,
            collection_index,
            ranges,
        } => {
            sqlx::query(
                r#"
                INSERT INTO offer_pools (marketplace, pool_index, contract, collection_index, ranges)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (marketplace, pool_index) DO UPDATE SET
                    contract = EXCLUDED.contract,
                    collection_index = EXCLUDED.collection_index,
                    ranges = EXCLUDED.ranges
                "#,
            )
            .bind(hex(marketplace))
            .bind(pool_index.to_string())
            .bind(hex(contract))
            .bind(collection_index.to_string())
            .bind(ranges.to_string())
            .execute(&mut *conn)
            .await?;
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
                let has_pool = exists(
                    conn,
                    "SELECT EXISTS(SELECT 1 FROM offer_pools WHERE marketplace = $1 AND pool_index = $2)",
                    marketplace,
                    &pool,
                )
                .await?;
                if !has_pool {
                    return Err(missing(log, change, format!("offer pool {pool}")));
                }
            }
            sqlx::query(
                r#"
                INSERT INTO offers (marketplace, offer_key, pool_index, contract, range_index, price, name, visible)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (marketplace, offer_key) DO UPDATE SET
                    contract = EXCLUDED.contract,
                    range_index = EXCLUDED.range_index,
                    price = EXCLUDED.price,
                    name = EXCLUDED.name,
                    visible = EXCLUDED.visible
                "#,
            )
            .bind(hex(marketplace))
            .bind(key.to_string())
            .bind(key.pool().map(|p| p.to_string()))
            .bind(hex(contract))
            .bind(range_index.to_string())
            .bind(price.map(|p| p.to_string()))
            .bind(name.as_deref())
            .bind(*visible)
            .execute(&mut *conn)
            .await?;
        }
        StateChange::OfferUpdated {
            marketplace,
            key,
            price,
            name,
            visible,
        } => {
            let updated = update_offer(conn, marketplace, key, *price, name.as_deref(), *visible).await?;
            if updated == 0 {
                return Err(missing(log, change, format!("offer {key}")));
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
            sqlx::query(
                r#"
                INSERT INTO resale_offers (marketplace, offer_index, contract, seller, token_index, price, status)
                VALUES ($1, $2, $3, $4, $5, $6, 'open')
                ON CONFLICT (marketplace, offer_index) DO UPDATE SET
                    contract = EXCLUDED.contract,
                    seller = EXCLUDED.seller,
                    token_index = EXCLUDED.token_index,
                    price = EXCLUDED.price,
                    status = 'open',
                    buyer = NULL
                "#,
            )
            .bind(hex(marketplace))
            .bind(offer_index.to_string())
            .bind(hex(contract))
            .bind(hex(seller))
            .bind(token_index.to_string())
            .bind(price.to_string())
            .execute(&mut *conn)
            .await?;
        }
        StateChange::ResaleOfferClosed {
            marketplace,
            offer_index,
            status,
            buyer,
        } => {
            let updated = sqlx::query(
                "UPDATE resale_offers SET status = $3, buyer = $4 WHERE marketplace = $1 AND offer_index = $2",
            )
            .bind(hex(marketplace))
            .bind(offer_index.to_string())
            .bind(status.to_string())
            .bind(buyer.as_ref().map(hex))
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(missing(log, change, format!("resale offer {offer_index}")));
            }
        }
        StateChange::RoyaltiesUpdated { contract, shares } => {
            sqlx::query("DELETE FROM royalties WHERE contract = $1")
                .bind(hex(contract))
                .execute(&mut *conn)
                .await?;
            for (position, share) in shares.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO royalties (contract, position, recipient, percentage) VALUES ($1, $2, $3, $4)",
                )
                .bind(hex(contract))
                .bind(position as i32)
                .bind(hex(&share.recipient))
                .bind(share.percentage.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }
        StateChange::CreditDeposited {
            account,
            token,
            amount,
        } => {
            // Balances are uint256 on chain; a sum past U256::MAX is rejected.
            let updated = sqlx::query(
                r#"
                INSERT INTO credit_balances (account, token, balance) VALUES ($1, $2, $3::numeric)
                ON CONFLICT (account, token) DO UPDATE SET balance = credit_balances.balance + EXCLUDED.balance
                WHERE credit_balances.balance + EXCLUDED.balance <= $4::numeric
                "#,
            )
            .bind(hex(account))
            .bind(hex(token))
            .bind(amount.to_string())
            .bind(U256::MAX.to_string())
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                let available = credit_balance(conn, account, token).await?;
                return Err(StoreError::CreditOverflow {
                    key: log.key(),
                    account: *account,
                    token: *token,
                    available,
                    deposited: *amount,
                });
            }
            record_credit(conn, log, account, token, "deposit", amount).await?;
        }
        StateChange::CreditWithdrawn {
            account,
            token,
            amount,
        } => {
            let updated = sqlx::query(
                r#"
                UPDATE credit_balances SET balance = balance - $3::numeric
                WHERE account = $1 AND token = $2 AND balance >= $3::numeric
                "#,
            )
            .bind(hex(account))
            .bind(hex(token))
            .bind(amount.to_string())
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                let available = credit_balance(conn, account, token).await?;
                return Err(StoreError::InsufficientCredit {
                    key: log.key(),
                    account: *account,
                    token: *token,
                    available,
                    requested: *amount,
                });
            }
            record_credit(conn, log, account, token, "withdrawal", amount).await?;
        }
    }
    Ok(())
}

/// Set the owner unless a log later in the chain already did.
async fn upsert_owner(
    conn: &mut PgConnection,
    contract: &Address,
    token_index: &U256,
    owner: &Address,
    block: i64,
    log_index: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO tokens (contract, token_index, owner, last_block, last_log_index)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (contract, token_index) DO UPDATE SET
            owner = EXCLUDED.owner,
            last_block = EXCLUDED.last_block,
            last_log_index = EXCLUDED.last_log_index
        WHERE (tokens.last_block, tokens.last_log_index) < (EXCLUDED.last_block, EXCLUDED.last_log_index)
        "#,
    )
    .bind(hex(contract))
    .bind(token_index.to_string())
    .bind(hex(owner))
    .bind(block)
    .bind(log_index)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_offer(
    conn: &mut PgConnection,
    marketplace: &Address,
    key: &OfferKey,
    price: Option<U256>,
    name: Option<&str>,
    visible: Option<bool>,
) -> Result<u64, StoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE offers SET
            price = COALESCE($3, price),
            name = COALESCE($4, name),
            visible = COALESCE($5, visible)
        WHERE marketplace = $1 AND offer_key = $2
        "#,
    )
    .bind(hex(marketplace))
    .bind(key.to_string())
    .bind(price.map(|p| p.to_string()))
    .bind(name)
    .bind(visible)
    .execute(&mut *conn)
    .await?;
    Ok(updated.rows_affected())
}

async fn record_credit(
    conn: &mut PgConnection,
    log: &AppliedLog,
    account: &Address,
    token: &Address,
    direction: &str,
    amount: &U256,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO credit_ledger (tx_hash, log_index, account, token, direction, amount)
        VALUES ($1, $2, $3, $4, $5, $6::numeric)
        "#,
    )
    .bind(format!("{:#x}", log.meta.tx_hash))
    .bind(log.meta.log_index as i64)
    .bind(hex(account))
    .bind(hex(token))
    .bind(direction)
    .bind(amount.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn credit_balance(
    conn: &mut PgConnection,
    account: &Address,
    token: &Address,
) -> Result<U256, StoreError> {
    let balance: Option<String> = sqlx::query_scalar(
        "SELECT balance::text FROM credit_balances WHERE account = $1 AND token = $2",
    )
    .bind(hex(account))
    .bind(hex(token))
    .fetch_optional(&mut *conn)
    .await?;

    match balance {
        None => Ok(U256::ZERO),
        Some(text) => text.parse::<U256>().map_err(|_| StoreError::Corrupt {
            table: "credit_balances",
            value: text,
        }),
    }
}
