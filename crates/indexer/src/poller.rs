use std::collections::HashSet;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use anyhow::Context;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use mirror_common::config::AppConfig;
use mirror_common::error::AppError;
use mirror_common::types::LogRecord;
use mirror_engine::{FailedRecord, PartitionedDispatcher, StateStore};

/// Counters for one block window after retries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub duplicates: usize,
    pub unhandled: usize,
    pub unknown: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Dead-lettered records dispatched again ahead of the window.
    pub replayed: usize,
    /// Dead-lettered records that now have a ledger row.
    pub resolved: usize,
}

/// Block poller that fetches registered events from the chain in block
/// windows and dispatches them into the mirror.
pub struct BlockPoller<S> {
    rpc_url: String,
    poll_interval: Duration,
    start_block: Option<u64>,
    batch_blocks: u64,
    max_retries: u32,
    pool: PgPool,
    dispatcher: PartitionedDispatcher<S>,
    /// topic0 filter; every identifier the registry knows.
    interest: Vec<B256>,
}

impl<S: StateStore> BlockPoller<S> {
    pub fn new(config: &AppConfig, pool: PgPool, dispatcher: PartitionedDispatcher<S>) -> Self {
        let interest = dispatcher.dispatcher().registry().interest_set();
        Self {
            rpc_url: config.rpc_url.clone(),
            poll_interval: Duration::from_millis(config.indexer_poll_interval_ms),
            start_block: config.indexer_start_block,
            batch_blocks: config.indexer_batch_blocks.max(1),
            max_retries: config.indexer_max_retries,
            pool,
            dispatcher,
            interest,
        }
    }

    /// Start the polling loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| AppError::Rpc(e.to_string()))?;

        let mut next_block = match self.last_indexed_block(chain_id).await? {
            Some(last) => last + 1,
            None => match self.start_block {
                Some(block) => block,
                None => {
                    tracing::info!("No previous indexed block found, starting from latest");
                    provider
                        .get_block_number()
                        .await
                        .map_err(|e| AppError::Rpc(e.to_string()))?
                }
            },
        };

        tracing::info!(
            chain_id,
            start_block = next_block,
            batch_blocks = self.batch_blocks,
            events = self.interest.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Block poller started"
        );

        loop {
            let head = match provider.get_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch chain head, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if next_block > head {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let to_block = head.min(next_block.saturating_add(self.batch_blocks - 1));
            let records = match self.fetch_records(&provider, next_block, to_block).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(
                        from_block = next_block,
                        to_block,
                        error = %e,
                        "Failed to fetch logs, retrying"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let fetched = records.len();
            let summary = self.process_window(records).await?;
            if fetched > 0 || summary.replayed > 0 {
                tracing::info!(
                    from_block = next_block,
                    to_block,
                    fetched,
                    applied = summary.applied,
                    duplicates = summary.duplicates,
                    unhandled = summary.unhandled,
                    dead_lettered = summary.dead_lettered,
                    replayed = summary.replayed,
                    resolved = summary.resolved,
                    "Processed block window"
                );
            }

            self.update_indexer_state(chain_id, to_block).await?;
            next_block = to_block + 1;
        }
    }

    async fn fetch_records(
        &self,
        provider: &impl Provider,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, AppError> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .event_signature(self.interest.clone());

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| AppError::Rpc(e.to_string()))?;

        let records: Vec<LogRecord> = logs.iter().filter_map(to_record).collect();
        if records.len() < logs.len() {
            tracing::debug!(
                skipped = logs.len() - records.len(),
                "Skipped pending or anonymous logs"
            );
        }
        Ok(records)
    }

    /// Dispatch a fetched window together with every unresolved retryable
    /// dead letter.
    ///
    /// Replayed records sort ahead of the window's logs of the same address,
    /// so later logs of that contract stay behind the one that failed.
    pub async fn process_window(&self, records: Vec<LogRecord>) -> anyhow::Result<BatchSummary> {
        let pending = self.pending_failures().await?;
        let replayed = pending.len();

        let mut seen: HashSet<_> = records.iter().map(LogRecord::ledger_key).collect();
        let mut batch = records;
        for record in pending {
            if seen.insert(record.ledger_key()) {
                batch.push(record);
            }
        }

        let mut summary = self.process_batch(batch).await?;
        summary.replayed = replayed;
        if replayed > 0 {
            summary.resolved = self.resolve_applied().await? as usize;
            tracing::debug!(replayed, resolved = summary.resolved, "Replayed dead-lettered logs");
        }
        Ok(summary)
    }

    /// Unresolved retryable dead letters, oldest first.
    pub async fn pending_failures(&self) -> anyhow::Result<Vec<LogRecord>> {
        let rows: Vec<StoredFailure> = sqlx::query_as(
            r#"
            SELECT tx_hash, log_index, block_number, address, identifier, topics, data
            FROM failed_logs
            WHERE retryable AND NOT resolved
            ORDER BY block_number, log_index
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let (tx_hash, log_index) = (row.0.clone(), row.1);
            match stored_record(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!(
                    tx_hash = %tx_hash,
                    log_index,
                    error = %e,
                    "Dead-lettered log cannot be rebuilt, skipping replay"
                ),
            }
        }
        Ok(records)
    }

    /// Mark dead letters whose ledger row now exists as resolved.
    pub async fn resolve_applied(&self) -> anyhow::Result<u64> {
        let resolved = sqlx::query(
            r#"
            UPDATE failed_logs SET resolved = TRUE, resolved_at = NOW()
            WHERE NOT resolved
              AND EXISTS (
                  SELECT 1 FROM applied_logs a
                  WHERE a.tx_hash = failed_logs.tx_hash AND a.log_index = failed_logs.log_index
              )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(resolved.rows_affected())
    }

    /// Dispatch a batch, re-dispatching retryable failures and dead-lettering
    /// whatever still fails after `max_retries` attempts.
    pub async fn process_batch(&self, records: Vec<LogRecord>) -> anyhow::Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }

        let mut report = self.dispatcher.dispatch_batch(records).await;
        let mut attempt: u32 = 0;

        loop {
            summary.applied += report.applied;
            summary.duplicates += report.duplicates;
            summary.unhandled += report.unhandled;
            summary.unknown += report.unknown;

            if !report.panicked.is_empty() {
                // Outcomes are unknown; the window is fetched again on restart.
                anyhow::bail!(
                    "dispatch task failed for {} contract partitions",
                    report.panicked.len()
                );
            }

            let mut again = Vec::new();
            let mut exhausted = Vec::new();
            for failure in report.failures {
                if !failure.error.is_retryable() {
                    // Skip the bad record; its followers can still apply.
                    self.dead_letter(&failure.record, &failure.error.to_string(), false, attempt + 1)
                        .await?;
                    summary.dead_lettered += 1;
                    again.extend(failure.deferred);
                } else if attempt >= self.max_retries {
                    exhausted.push(failure);
                } else {
                    again.extend(failure.into_records());
                }
            }

            for failure in exhausted {
                summary.dead_lettered += self.dead_letter_all(failure, attempt + 1).await?;
            }

            if again.is_empty() {
                return Ok(summary);
            }

            attempt += 1;
            summary.retried += again.len();
            tracing::debug!(attempt, records = again.len(), "Re-dispatching failed records");
            tokio::time::sleep(self.poll_interval).await;
            report = self.dispatcher.dispatch_batch(again).await;
        }
    }

    async fn dead_letter_all(&self, failure: FailedRecord, attempts: u32) -> anyhow::Result<usize> {
        let reason = failure.error.to_string();
        self.dead_letter(&failure.record, &reason, true, attempts).await?;

        let key = failure.record.ledger_key();
        for record in &failure.deferred {
            let deferred_reason = format!("Deferred behind failed log {key}: {reason}");
            self.dead_letter(record, &deferred_reason, true, attempts).await?;
        }
        Ok(1 + failure.deferred.len())
    }

    /// Record a log that could not be applied in `failed_logs` for investigation.
    ///
    /// A log that is already dead-lettered and unresolved keeps its row; the
    /// attempts add up and the latest error replaces the old one.
    pub async fn dead_letter(
        &self,
        record: &LogRecord,
        reason: &str,
        retryable: bool,
        attempts: u32,
    ) -> anyhow::Result<()> {
        let topics: Vec<String> = record.topics.iter().map(|t| format!("{:#x}", t)).collect();

        sqlx::query(
            r#"
            INSERT INTO failed_logs (id, tx_hash, log_index, block_number, address, identifier,
                                     topics, data, error, retryable, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (tx_hash, log_index) WHERE NOT resolved DO UPDATE SET
                error = EXCLUDED.error,
                retryable = EXCLUDED.retryable,
                attempts = failed_logs.attempts + EXCLUDED.attempts,
                failed_at = EXCLUDED.failed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(format!("{:#x}", record.tx_hash))
        .bind(record.log_index as i64)
        .bind(record.block_number as i64)
        .bind(format!("{:#x}", record.address))
        .bind(format!("{:#x}", record.identifier))
        .bind(serde_json::json!(topics))
        .bind(record.data.to_string())
        .bind(reason)
        .bind(retryable)
        .bind(attempts as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::error!(
            key = %record.ledger_key(),
            address = %record.address,
            block = record.block_number,
            retryable,
            attempts,
            error = reason,
            "Log dead-lettered"
        );
        Ok(())
    }

    /// Update the indexer's last processed block number.
    pub async fn update_indexer_state(&self, chain_id: u64, block_number: u64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_state (chain_id, last_block)
            VALUES ($1, $2)
            ON CONFLICT (chain_id) DO UPDATE SET last_block = $2, updated_at = NOW()
            "#,
        )
        .bind(chain_id as i64)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the last indexed block number from the database.
    pub async fn last_indexed_block(&self, chain_id: u64) -> anyhow::Result<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM indexer_state WHERE chain_id = $1")
                .bind(chain_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(b,)| b as u64))
    }
}

/// `failed_logs` columns needed to rebuild a record.
type StoredFailure = (String, i64, i64, String, String, serde_json::Value, String);

fn stored_record(row: StoredFailure) -> anyhow::Result<LogRecord> {
    let (tx_hash, log_index, block_number, address, identifier, topics, data) = row;
    let topics: Vec<String> = serde_json::from_value(topics).context("topics")?;
    Ok(LogRecord {
        identifier: identifier.parse::<B256>().context("identifier")?,
        topics: topics
            .iter()
            .map(|topic| topic.parse::<B256>())
            .collect::<Result<_, _>>()
            .context("topics")?,
        data: data.parse::<Bytes>().context("data")?,
        address: address.parse::<Address>().context("address")?,
        block_number: u64::try_from(block_number).context("block_number")?,
        log_index: u64::try_from(log_index).context("log_index")?,
        tx_hash: tx_hash.parse::<B256>().context("tx_hash")?,
    })
}

/// Convert an RPC log into a dispatchable record.
///
/// Pending logs (no block number, index or transaction hash yet) and
/// anonymous logs (no topic0) yield `None`.
pub fn to_record(log: &Log) -> Option<LogRecord> {
    let (identifier, topics) = log.topics().split_first()?;
    Some(LogRecord {
        identifier: *identifier,
        topics: topics.to_vec(),
        data: log.data().data.clone(),
        address: log.address(),
        block_number: log.block_number?,
        log_index: log.log_index?,
        tx_hash: log.transaction_hash?,
    })
}
