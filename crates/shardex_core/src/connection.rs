//! The seam to physical data sources.
//!
//! Drivers, pooling and transactions live behind `ConnectionProvider`. The
//! core only prepares statements on connections it is handed and closes
//! every statement it prepared.

use std::fmt;
use std::sync::Arc;

use shardex_common::datum::Datum;
use shardex_common::error::ShardexResult;
use shardex_common::types::ShardName;

use crate::cursor::ShardCursor;

pub trait ConnectionProvider: Send + Sync {
    /// A connection to `shard`. Providers that scope a transaction to the
    /// logical connection return the same connection for repeated calls.
    fn connection(&self, shard: &ShardName) -> ShardexResult<Arc<dyn PhysicalConnection>>;
}

pub trait PhysicalConnection: Send + Sync {
    fn shard(&self) -> &ShardName;

    fn prepare(&self, sql: &str) -> ShardexResult<Box<dyn PhysicalStatement>>;
}

/// A prepared statement on one shard. Used by one worker at a time.
pub trait PhysicalStatement: Send {
    fn set_parameters(&mut self, params: &[Datum]) -> ShardexResult<()>;

    fn execute_query(&mut self) -> ShardexResult<Box<dyn ShardCursor>>;

    fn execute_update(&mut self) -> ShardexResult<UpdateOutcome>;

    fn execute(&mut self) -> ShardexResult<ExecuteOutcome>;

    /// Queue the currently bound parameters as one batch entry.
    fn add_batch(&mut self) -> ShardexResult<()>;

    /// One affected-row count per queued entry, in queue order.
    fn execute_batch(&mut self) -> ShardexResult<Vec<u64>>;

    /// Keys generated natively by the most recent batch.
    fn batch_generated_keys(&mut self) -> Vec<Datum> {
        Vec::new()
    }

    fn close(&mut self) -> ShardexResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub affected: u64,
    /// Keys the data source generated itself (auto-increment columns).
    pub generated_keys: Vec<Datum>,
}

impl UpdateOutcome {
    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            generated_keys: Vec::new(),
        }
    }
}

pub enum ExecuteOutcome {
    Rows(Box<dyn ShardCursor>),
    Update(UpdateOutcome),
}

impl fmt::Debug for ExecuteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteOutcome::Rows(c) => f.debug_tuple("Rows").field(&c.columns()).finish(),
            ExecuteOutcome::Update(u) => f.debug_tuple("Update").field(u).finish(),
        }
    }
}
