//! Concurrent dispatch of a log batch, partitioned by emitting contract.
//!
//! Records from one contract are applied strictly in chain order on one task;
//! different contracts run in parallel, bounded by a semaphore. The first
//! failure in a partition stops it and defers everything after it, so a later
//! log never lands before an earlier one from the same contract.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use mirror_common::types::LogRecord;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
use crate::store::StateStore;

/// A record that failed, plus the records of its partition that were not
/// attempted because of it.
#[derive(Debug)]
pub struct FailedRecord {
    pub record: LogRecord,
    pub error: DispatchError,
    pub deferred: Vec<LogRecord>,
}

impl FailedRecord {
    /// The failed record followed by its deferred records, in chain order.
    pub fn into_records(self) -> Vec<LogRecord> {
        let mut records = Vec::with_capacity(1 + self.deferred.len());
        records.push(self.record);
        records.extend(self.deferred);
        records
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: usize,
    pub duplicates: usize,
    pub unhandled: usize,
    pub unknown: usize,
    pub failures: Vec<FailedRecord>,
    /// Partitions whose task panicked; none of their outcomes are known.
    pub panicked: Vec<Address>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.panicked.is_empty()
    }

    pub fn deferred(&self) -> usize {
        self.failures.iter().map(|f| f.deferred.len()).sum()
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Applied => self.applied += 1,
            DispatchOutcome::Duplicate => self.duplicates += 1,
            DispatchOutcome::Unhandled => self.unhandled += 1,
            DispatchOutcome::UnknownEvent => self.unknown += 1,
        }
    }

    fn absorb(&mut self, other: BatchReport) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.unhandled += other.unhandled;
        self.unknown += other.unknown;
        self.failures.extend(other.failures);
        self.panicked.extend(other.panicked);
    }
}

pub struct PartitionedDispatcher<S> {
    dispatcher: Dispatcher<S>,
    workers: usize,
}

impl<S: StateStore> PartitionedDispatcher<S> {
    pub fn new(dispatcher: Dispatcher<S>, workers: usize) -> Self {
        Self {
            dispatcher,
            workers: workers.max(1),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    pub async fn dispatch_batch(&self, records: Vec<LogRecord>) -> BatchReport {
        let mut partitions: HashMap<Address, Vec<LogRecord>> = HashMap::new();
        for record in records {
            partitions.entry(record.address).or_default().push(record);
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut addresses = HashMap::new();

        for (address, mut records) in partitions {
            records.sort_by_key(LogRecord::position);
            let dispatcher = self.dispatcher.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                run_partition(&dispatcher, address, records).await
            });
            addresses.insert(handle.id(), address);
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, partition)) => report.absorb(partition),
                Err(err) => {
                    let address = addresses.get(&err.id()).copied().unwrap_or_default();
                    tracing::error!(address = %address, error = %err, "Partition task failed");
                    report.panicked.push(address);
                }
            }
        }
        report
    }
}

async fn run_partition<S: StateStore>(
    dispatcher: &Dispatcher<S>,
    address: Address,
    records: Vec<LogRecord>,
) -> BatchReport {
    let mut report = BatchReport::default();
    let mut records = records.into_iter();

    while let Some(record) = records.next() {
        match dispatcher.dispatch(&record).await {
            Ok(outcome) => report.record(outcome),
            Err(error) => {
                let deferred: Vec<LogRecord> = records.collect();
                tracing::debug!(
                    address = %address,
                    key = %record.ledger_key(),
                    deferred = deferred.len(),
                    "Partition stopped at failed record"
                );
                report.failures.push(FailedRecord {
                    record,
                    error,
                    deferred,
                });
                break;
            }
        }
    }
    report
}
