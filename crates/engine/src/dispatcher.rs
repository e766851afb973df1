//! Routes one raw log to its handler and applies the result.

use std::sync::Arc;

use mirror_common::types::{AppliedLog, LedgerKey, LogRecord};
use mirror_decoders::{DecodeError, EventRegistry, Handler, HandlerError, decode_log};
use thiserror::Error;

use crate::store::{ApplyOutcome, StateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// The log was applied before; state is unchanged.
    Duplicate,
    /// Known event without a handler.
    Unhandled,
    /// topic0 is not in the registry.
    UnknownEvent,
}

/// Why a handler could not complete.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Arguments(#[from] HandlerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Malformed log {key}: {source}")]
    MalformedLog {
        key: LedgerKey,
        #[source]
        source: DecodeError,
    },

    #[error("Handler {handler} failed for {key}: {cause}")]
    HandlerFailure {
        key: LedgerKey,
        handler: Handler,
        #[source]
        cause: FailureCause,
    },
}

impl DispatchError {
    /// Store failures may clear up (a missing dependency lands, the database
    /// recovers). Undecodable logs and bad handler arguments never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::MalformedLog { .. } => false,
            DispatchError::HandlerFailure { cause, .. } => match cause {
                FailureCause::Arguments(_) => false,
                FailureCause::Store(err) => err.is_retryable(),
            },
        }
    }

    pub fn key(&self) -> LedgerKey {
        match self {
            DispatchError::MalformedLog { key, .. } | DispatchError::HandlerFailure { key, .. } => *key,
        }
    }
}

/// Dispatches logs against an immutable registry and a shared store.
///
/// Cheap to clone; workers each hold a clone.
pub struct Dispatcher<S> {
    registry: Arc<EventRegistry>,
    store: Arc<S>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: StateStore> Dispatcher<S> {
    pub fn new(registry: Arc<EventRegistry>, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn dispatch(&self, record: &LogRecord) -> Result<DispatchOutcome, DispatchError> {
        let key = record.ledger_key();

        let Some(entry) = self.registry.get(&record.identifier) else {
            tracing::debug!(
                identifier = %record.identifier,
                address = %record.address,
                key = %key,
                "Ignoring log with unknown event identifier"
            );
            return Ok(DispatchOutcome::UnknownEvent);
        };

        let Some(handler) = entry.handler else {
            return Ok(DispatchOutcome::Unhandled);
        };

        let decoded = decode_log(&entry.fragment, entry.generation, record).map_err(|source| {
            tracing::warn!(key = %key, signature = %entry.signature, error = %source, "Malformed log");
            DispatchError::MalformedLog { key, source }
        })?;

        let failure = |cause: FailureCause| {
            tracing::warn!(key = %key, handler = %handler, error = %cause, "Handler failed");
            DispatchError::HandlerFailure {
                key,
                handler,
                cause,
            }
        };

        if self
            .store
            .is_applied(&key)
            .await
            .map_err(|err| failure(err.into()))?
        {
            tracing::debug!(key = %key, event = %decoded.event, "Log already applied");
            return Ok(DispatchOutcome::Duplicate);
        }

        let meta = record.meta();
        let changes = handler
            .apply(&decoded, &meta)
            .map_err(|err| failure(err.into()))?;

        let applied = AppliedLog {
            meta,
            event: decoded.event.clone(),
            args: decoded.to_json(),
        };

        match self
            .store
            .apply(&applied, &changes)
            .await
            .map_err(|err| failure(err.into()))?
        {
            ApplyOutcome::Applied => {
                tracing::debug!(
                    key = %key,
                    event = %decoded.event,
                    generation = %decoded.generation,
                    handler = %handler,
                    changes = changes.len(),
                    "Applied log"
                );
                Ok(DispatchOutcome::Applied)
            }
            ApplyOutcome::AlreadyApplied => Ok(DispatchOutcome::Duplicate),
        }
    }
}
