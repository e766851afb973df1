//! Decoding of raw logs against a single ABI fragment.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, U256};
use mirror_common::types::{Generation, LogRecord};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to decode {signature}: {source}")]
    Abi {
        signature: String,
        #[source]
        source: alloy::dyn_abi::Error,
    },

    #[error("Decoded {got} values for {signature}, fragment declares {expected}")]
    Arity {
        signature: String,
        expected: usize,
        got: usize,
    },
}

/// Errors raised by handlers while reading decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Event {event} has no argument named any of {names:?}")]
    MissingArgument {
        event: String,
        names: Vec<&'static str>,
    },

    #[error("Argument {name} of {event} is not of type {expected}")]
    UnexpectedType {
        event: String,
        name: String,
        expected: &'static str,
    },

    #[error("Invalid arguments for {event}: {reason}")]
    InvalidArguments { event: String, reason: String },
}

/// Arguments of one log, in declaration order, with the generation of the
/// fragment that decoded them.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub event: String,
    pub generation: Generation,
    pub args: Vec<(String, DynSolValue)>,
}

/// Decode `record` using exactly `fragment`.
///
/// Indexed parameters come from the record's topics, the rest from its data
/// payload; the result interleaves both back into declaration order. Unnamed
/// parameters are called `_<position>`.
pub fn decode_log(
    fragment: &Event,
    generation: Generation,
    record: &LogRecord,
) -> Result<DecodedLog, DecodeError> {
    let topics = std::iter::once(record.identifier).chain(record.topics.iter().copied());
    let decoded = fragment
        .decode_log_parts(topics, &record.data)
        .map_err(|source| DecodeError::Abi {
            signature: fragment.signature(),
            source,
        })?;

    let got = decoded.indexed.len() + decoded.body.len();
    if got != fragment.inputs.len() {
        return Err(DecodeError::Arity {
            signature: fragment.signature(),
            expected: fragment.inputs.len(),
            got,
        });
    }

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Vec::with_capacity(fragment.inputs.len());
    for (position, param) in fragment.inputs.iter().enumerate() {
        let value = if param.indexed {
            indexed.next()
        } else {
            body.next()
        };
        // Counts were checked above, so both iterators hold enough values.
        let Some(value) = value else {
            return Err(DecodeError::Arity {
                signature: fragment.signature(),
                expected: fragment.inputs.len(),
                got,
            });
        };
        let name = if param.name.is_empty() {
            format!("_{position}")
        } else {
            param.name.clone()
        };
        args.push((name, value));
    }

    Ok(DecodedLog {
        event: fragment.name.clone(),
        generation,
        args,
    })
}

impl DecodedLog {
    /// First argument whose name is in `names`.
    pub fn value(&self, names: &[&'static str]) -> Result<&DynSolValue, HandlerError> {
        self.find(names).map(|(_, value)| value).ok_or_else(|| {
            HandlerError::MissingArgument {
                event: self.event.clone(),
                names: names.to_vec(),
            }
        })
    }

    pub fn has(&self, names: &[&'static str]) -> bool {
        self.find(names).is_some()
    }

    pub fn address(&self, names: &[&'static str]) -> Result<Address, HandlerError> {
        match self.named(names)? {
            (_, DynSolValue::Address(address)) => Ok(*address),
            (name, _) => Err(self.unexpected(name, "address")),
        }
    }

    pub fn uint(&self, names: &[&'static str]) -> Result<U256, HandlerError> {
        match self.named(names)? {
            (_, DynSolValue::Uint(value, _)) => Ok(*value),
            (name, _) => Err(self.unexpected(name, "uint")),
        }
    }

    pub fn string(&self, names: &[&'static str]) -> Result<String, HandlerError> {
        match self.named(names)? {
            (_, DynSolValue::String(value)) => Ok(value.clone()),
            (name, _) => Err(self.unexpected(name, "string")),
        }
    }

    pub fn boolean(&self, names: &[&'static str]) -> Result<bool, HandlerError> {
        match self.named(names)? {
            (_, DynSolValue::Bool(value)) => Ok(*value),
            (name, _) => Err(self.unexpected(name, "bool")),
        }
    }

    pub fn address_array(&self, names: &[&'static str]) -> Result<Vec<Address>, HandlerError> {
        let (name, value) = self.named(names)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.unexpected(name, "address[]"))?;
        items
            .iter()
            .map(|item| item.as_address().ok_or_else(|| self.unexpected(name, "address[]")))
            .collect()
    }

    pub fn uint_array(&self, names: &[&'static str]) -> Result<Vec<U256>, HandlerError> {
        let (name, value) = self.named(names)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.unexpected(name, "uint[]"))?;
        items
            .iter()
            .map(|item| {
                item.as_uint()
                    .map(|(value, _)| value)
                    .ok_or_else(|| self.unexpected(name, "uint[]"))
            })
            .collect()
    }

    /// Like [`Self::uint`] but `None` when the fragment has no such argument.
    pub fn opt_uint(&self, names: &[&'static str]) -> Result<Option<U256>, HandlerError> {
        if self.has(names) {
            self.uint(names).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_string(&self, names: &[&'static str]) -> Result<Option<String>, HandlerError> {
        if self.has(names) {
            self.string(names).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn opt_boolean(&self, names: &[&'static str]) -> Result<Option<bool>, HandlerError> {
        if self.has(names) {
            self.boolean(names).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn invalid(&self, reason: impl Into<String>) -> HandlerError {
        HandlerError::InvalidArguments {
            event: self.event.clone(),
            reason: reason.into(),
        }
    }

    /// Arguments as a JSON object (big integers rendered as decimal strings).
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .args
            .iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect();
        Value::Object(map)
    }

    fn find(&self, names: &[&'static str]) -> Option<&(String, DynSolValue)> {
        names
            .iter()
            .find_map(|wanted| self.args.iter().find(|(name, _)| name == wanted))
    }

    fn named(&self, names: &[&'static str]) -> Result<(&str, &DynSolValue), HandlerError> {
        self.find(names)
            .map(|(name, value)| (name.as_str(), value))
            .ok_or_else(|| HandlerError::MissingArgument {
                event: self.event.clone(),
                names: names.to_vec(),
            })
    }

    fn unexpected(&self, name: &str, expected: &'static str) -> HandlerError {
        HandlerError::UnexpectedType {
            event: self.event.clone(),
            name: name.to_string(),
            expected,
        }
    }
}

fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => json!(b),
        DynSolValue::Int(i, _) => json!(i.to_string()),
        DynSolValue::Uint(u, _) => json!(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            json!(format!("0x{}", alloy::hex::encode(&word[..*size])))
        }
        DynSolValue::Address(a) => json!(format!("{:#x}", a)),
        DynSolValue::Bytes(b) => json!(format!("0x{}", alloy::hex::encode(b))),
        DynSolValue::String(s) => json!(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => json!(format!("{:?}", other)),
    }
}
