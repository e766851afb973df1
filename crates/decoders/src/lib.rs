pub mod corpus;
pub mod decode;
pub mod fragment;
pub mod handlers;
pub mod registry;
pub mod signature;

#[cfg(test)]
mod decoder_tests;

pub use corpus::{AbiSource, CorpusAbi};
pub use decode::{DecodeError, DecodedLog, HandlerError, decode_log};
pub use fragment::{FragmentError, extract_fragment};
pub use handlers::{Handler, handler_for};
pub use registry::{EventRegistry, RegistryEntry, RegistryError};
pub use signature::{EventSignature, identifier};
