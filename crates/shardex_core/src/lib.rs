//! Sharding core: routes a parsed logical statement to physical shards,
//! executes the route units concurrently and merges their results back into
//! what the caller would have seen from a single database.
//!
//! Parsing, driver access and transactions stay outside: statements arrive
//! as `ParsedStatement`, shards are reached through `ConnectionProvider`.

pub mod connection;
pub mod context;
pub mod cursor;
pub mod execute;
pub mod generated_keys;
pub mod keygen;
pub mod memory;
pub mod merge;
pub mod parsed;
pub mod route;
pub mod rule;
pub mod statement;

pub use connection::{
    ConnectionProvider, ExecuteOutcome, PhysicalConnection, PhysicalStatement, UpdateOutcome,
};
pub use context::ShardingContext;
pub use cursor::{collect_rows, MemoryCursor, ShardCursor};
pub use execute::{BatchExecutor, CancelToken, ConnectionMode, PerShardResult, StatementExecutor};
pub use generated_keys::{GeneratedKeyReconciler, GeneratedKeysCursor, NATIVE_KEY_COLUMN};
pub use keygen::{IncrementKeyGenerator, KeyGenerator, SnowflakeKeyGenerator};
pub use memory::{ExecutedSql, MemoryConnectionProvider};
pub use merge::{MergeEngine, MergeStrategy, MergedCursor};
pub use parsed::{
    AggregationType, DmlStatement, InsertStatement, OrderByItem, OtherStatement, ParsedStatement,
    Projection, QueryStatement, ShardingCondition, ValueRef,
};
pub use route::{GeneratedKeyInfo, RouteResult, RouteUnit, RoutingEngine};
pub use rule::{
    spread_nodes, DataNode, ShardingAlgorithm, ShardingRule, ShardingValue, StaticShardingRule,
    TableRule,
};
pub use statement::{LogicalStatement, StatementPhase};
