//! Isolates the single ABI entry that describes one event.

use alloy::json_abi::{Event, JsonAbi};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("No event named '{0}' in ABI")]
    Missing(String),

    #[error("Event name '{name}' is declared {count} times in one ABI")]
    Ambiguous { name: String, count: usize },
}

/// Return the only event entry called `name` in `abi`.
///
/// Functions, errors and constructors sharing the name are not considered.
/// Overloaded events (same name, several entries) are rejected instead of
/// picking one of them.
pub fn extract_fragment<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Event, FragmentError> {
    match abi.events.get(name).map(Vec::as_slice) {
        None | Some([]) => Err(FragmentError::Missing(name.to_string())),
        Some([event]) => Ok(event),
        Some(events) => Err(FragmentError::Ambiguous {
            name: name.to_string(),
            count: events.len(),
        }),
    }
}
