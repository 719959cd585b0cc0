//! Shared building blocks for the Shardex sharding core: the `Datum` value
//! model, the error taxonomy and the runtime configuration.

pub mod config;
pub mod datum;
pub mod error;
pub mod types;

pub use config::ShardexConfig;
pub use datum::{Datum, OwnedRow};
pub use error::{ErrorKind, ExecutionError, ShardexError, ShardexResult, UnitFailure};
pub use types::{BatchCallId, ShardName, UnitIndex};
