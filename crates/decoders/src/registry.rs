//! Event registry: identifier → fragment, generation and handler.
//!
//! Built once at process start from the ABI corpus and immutable afterwards;
//! share it behind an `Arc` between dispatch workers.

use std::collections::{BTreeSet, HashMap};

use alloy::json_abi::Event;
use alloy::primitives::B256;
use mirror_common::types::Generation;
use thiserror::Error;

use crate::corpus::{AbiSource, CorpusAbi};
use crate::fragment::{FragmentError, extract_fragment};
use crate::handlers::{Handler, handler_for};
use crate::signature::EventSignature;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("ABI {source_abi} is not valid JSON ABI: {error}")]
    InvalidAbi {
        source_abi: AbiSource,
        #[source]
        error: serde_json::Error,
    },

    #[error("ABI {source_abi}: event '{name}' cannot be decoded: {error}")]
    MissingFragment {
        source_abi: AbiSource,
        name: String,
        #[source]
        error: FragmentError,
    },

    #[error("ABI {source_abi}: {error}")]
    AmbiguousFragment {
        source_abi: AbiSource,
        #[source]
        error: FragmentError,
    },

    #[error(
        "Identifier {identifier} registered by {existing_source} ({existing}) conflicts with {incoming_source} ({incoming})"
    )]
    Conflict {
        identifier: B256,
        existing: String,
        existing_source: AbiSource,
        incoming: String,
        incoming_source: AbiSource,
    },
}

/// Everything needed to decode and apply logs with one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub identifier: B256,
    pub signature: String,
    pub fragment: Event,
    pub generation: Generation,
    pub source: AbiSource,
    /// `None` for events that are recognised but not mirrored.
    pub handler: Option<Handler>,
}

impl RegistryEntry {
    pub fn name(&self) -> &str {
        &self.fragment.name
    }

    /// Two registrations describe the same event when everything but the
    /// corpus file they came from is identical.
    fn is_same_event(&self, other: &RegistryEntry) -> bool {
        self.signature == other.signature
            && self.fragment == other.fragment
            && self.generation == other.generation
            && self.handler == other.handler
    }
}

/// Immutable lookup table from event identifier to [`RegistryEntry`].
#[derive(Debug, Clone)]
pub struct EventRegistry {
    entries: HashMap<B256, RegistryEntry>,
}

impl EventRegistry {
    /// Build the registry from the bundled ABI corpus.
    pub fn build() -> Result<Self, RegistryError> {
        let corpus = AbiSource::ALL
            .iter()
            .map(|source| {
                source.load().map_err(|error| RegistryError::InvalidAbi {
                    source_abi: *source,
                    error,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_corpus(&corpus)
    }

    /// Build a registry from an explicit, ordered list of ABIs.
    pub fn from_corpus(corpus: &[CorpusAbi]) -> Result<Self, RegistryError> {
        let mut entries: HashMap<B256, RegistryEntry> = HashMap::new();

        for abi in corpus {
            let mut registered = 0usize;
            for declared in abi.abi.events() {
                let fragment = extract_fragment(&abi.abi, &declared.name).map_err(|error| {
                    match error {
                        FragmentError::Missing(ref name) => RegistryError::MissingFragment {
                            source_abi: abi.source,
                            name: name.clone(),
                            error,
                        },
                        FragmentError::Ambiguous { .. } => RegistryError::AmbiguousFragment {
                            source_abi: abi.source,
                            error,
                        },
                    }
                })?;

                let signature = EventSignature::from_fragment(fragment);
                let entry = RegistryEntry {
                    identifier: signature.identifier(),
                    signature: signature.canonical(),
                    fragment: fragment.clone(),
                    generation: abi.generation,
                    source: abi.source,
                    handler: handler_for(&fragment.name),
                };

                if let Some(existing) = entries.get(&entry.identifier) {
                    if existing.is_same_event(&entry) {
                        tracing::debug!(
                            signature = %entry.signature,
                            first = %existing.source,
                            again = %entry.source,
                            "Event declared by several ABIs with identical shape"
                        );
                        continue;
                    }
                    return Err(RegistryError::Conflict {
                        identifier: entry.identifier,
                        existing: existing.signature.clone(),
                        existing_source: existing.source,
                        incoming: entry.signature,
                        incoming_source: entry.source,
                    });
                }

                if entry.handler.is_none() {
                    tracing::debug!(
                        signature = %entry.signature,
                        source = %abi.source,
                        "Registered event without handler"
                    );
                }
                entries.insert(entry.identifier, entry);
                registered += 1;
            }

            tracing::debug!(
                source = %abi.source,
                generation = %abi.generation,
                deprecated = abi.source.is_deprecated(),
                events = registered,
                "Registered ABI events"
            );
        }

        let registry = Self { entries };
        tracing::info!(
            events = registry.len(),
            handled = registry.entries().filter(|e| e.handler.is_some()).count(),
            "Event registry built"
        );
        Ok(registry)
    }

    pub fn get(&self, identifier: &B256) -> Option<&RegistryEntry> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Every registered identifier, sorted. This is the topic0 filter the
    /// sync driver fetches logs with.
    pub fn interest_set(&self) -> Vec<B256> {
        let mut identifiers: Vec<B256> = self.entries.keys().copied().collect();
        identifiers.sort();
        identifiers
    }

    /// All entries declared under `name`, across generations and versions.
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RegistryEntry> {
        self.entries.values().filter(move |entry| entry.name() == name)
    }

    /// Identifiers of every entry whose event name is in `names`, sorted.
    pub fn identifiers_for(&self, names: &[&str]) -> Vec<B256> {
        let mut identifiers: Vec<B256> = self
            .entries
            .values()
            .filter(|entry| names.contains(&entry.name()))
            .map(|entry| entry.identifier)
            .collect();
        identifiers.sort();
        identifiers
    }

    /// Names of the events that have a handler bound.
    pub fn handled_names(&self) -> BTreeSet<&str> {
        self.entries
            .values()
            .filter(|entry| entry.handler.is_some())
            .map(RegistryEntry::name)
            .collect()
    }
}
