pub mod dispatcher;
pub mod memory;
pub mod partition;
pub mod postgres;
pub mod store;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, FailureCause};
pub use memory::MemoryStore;
pub use partition::{BatchReport, FailedRecord, PartitionedDispatcher};
pub use postgres::PgStore;
pub use store::{ApplyOutcome, StateStore, StoreError};
