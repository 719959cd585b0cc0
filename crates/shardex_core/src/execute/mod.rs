//! Execution coordinator: owns physical statement handles for one logical
//! call, binds parameters and fans route units out to their shards.

pub mod batch;
mod dispatch;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardex_common::config::ExecutorConfig;
use shardex_common::datum::Datum;
use shardex_common::error::{ExecutionError, ShardexError, ShardexResult, UnitFailure};
use shardex_common::types::{ShardName, UnitIndex};

use crate::connection::{ConnectionProvider, ExecuteOutcome, PhysicalStatement, UpdateOutcome};
use crate::cursor::{MemoryCursor, ShardCursor};
use crate::route::{RouteResult, RouteUnit};

pub use batch::{BatchExecutor, BatchRouteUnit};

/// How a shard's units use connections within one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One connection per unit; query cursors stream.
    MemoryStrictly,
    /// Units share a limited set of connections and run serially; query
    /// cursors are drained into memory before the next unit runs.
    ConnectionStrictly,
}

/// Best-effort cancellation shared between a logical statement and its
/// workers. Units not yet started when it trips fail with `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One route unit paired with the live statement prepared for it.
pub struct ExecutionUnit {
    pub index: UnitIndex,
    pub route_unit: RouteUnit,
    statement: Box<dyn PhysicalStatement>,
}

impl ExecutionUnit {
    pub fn statement(&mut self) -> &mut dyn PhysicalStatement {
        self.statement.as_mut()
    }
}

/// Units of one shard sharing one physical connection.
pub struct ExecutionGroup {
    pub shard: ShardName,
    pub mode: ConnectionMode,
    units: Vec<ExecutionUnit>,
}

impl ExecutionGroup {
    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    fn close(&mut self) {
        for unit in &mut self.units {
            if let Err(e) = unit.statement.close() {
                tracing::warn!(unit = %unit.index, shard = %self.shard, error = %e, "failed to close statement");
            }
        }
        self.units.clear();
    }
}

/// Outcome of one unit of a single-shot `execute()`.
pub enum PerShardResult {
    Query(Box<dyn ShardCursor>),
    Update(UpdateOutcome),
}

impl fmt::Debug for PerShardResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerShardResult::Query(c) => f.debug_tuple("Query").field(&c.columns()).finish(),
            PerShardResult::Update(u) => f.debug_tuple("Update").field(u).finish(),
        }
    }
}

impl PerShardResult {
    fn close(self) {
        if let PerShardResult::Query(mut c) = self {
            let _ = c.close();
        }
    }
}

/// Group `units` by shard in first-appearance order, split each shard's units
/// into at most `max_connections` partitions, and prepare one statement per
/// unit on its partition's connection. On failure every prepared statement is
/// closed before the error is returned.
pub(crate) fn prepare_groups(
    provider: &dyn ConnectionProvider,
    units: &[RouteUnit],
    max_connections: usize,
) -> ShardexResult<Vec<ExecutionGroup>> {
    let mut by_shard: Vec<(ShardName, Vec<usize>)> = Vec::new();
    for (i, unit) in units.iter().enumerate() {
        match by_shard.iter_mut().find(|(s, _)| *s == unit.shard) {
            Some((_, idxs)) => idxs.push(i),
            None => by_shard.push((unit.shard.clone(), vec![i])),
        }
    }

    let mut groups: Vec<ExecutionGroup> = Vec::new();
    for (shard, idxs) in by_shard {
        let connections = idxs.len().min(max_connections.max(1));
        let mode = if idxs.len() > connections {
            ConnectionMode::ConnectionStrictly
        } else {
            ConnectionMode::MemoryStrictly
        };
        let per_connection = idxs.len().div_ceil(connections);
        for partition in idxs.chunks(per_connection) {
            let mut group = ExecutionGroup {
                shard: shard.clone(),
                mode,
                units: Vec::with_capacity(partition.len()),
            };
            let failure = match provider.connection(&shard) {
                Err(e) => Some((partition[0], e)),
                Ok(conn) => {
                    let mut failed = None;
                    for &i in partition {
                        match conn.prepare(&units[i].sql) {
                            Ok(statement) => group.units.push(ExecutionUnit {
                                index: UnitIndex(i),
                                route_unit: units[i].clone(),
                                statement,
                            }),
                            Err(e) => {
                                failed = Some((i, e));
                                break;
                            }
                        }
                    }
                    failed
                }
            };
            groups.push(group);
            if let Some((i, error)) = failure {
                tracing::warn!(unit = i, shard = %shard, error = %error, "prepare failed, releasing prepared statements");
                for g in &mut groups {
                    g.close();
                }
                let failure = UnitFailure {
                    unit: UnitIndex(i),
                    shard: shard.clone(),
                    sql: units[i].sql.clone(),
                    error: Box::new(error),
                };
                return Err(ExecutionError::new(vec![failure], units.len()).into());
            }
        }
        tracing::debug!(shard = %shard, ?mode, connections, "shard prepared");
    }
    Ok(groups)
}

/// Single-shot executor for one logical call.
pub struct StatementExecutor {
    provider: Arc<dyn ConnectionProvider>,
    config: ExecutorConfig,
    cancel: CancelToken,
    groups: Vec<ExecutionGroup>,
    units: Vec<RouteUnit>,
}

impl StatementExecutor {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        config: ExecutorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            config,
            cancel,
            groups: Vec::new(),
            units: Vec::new(),
        }
    }

    /// Acquire connections and prepare one statement per route unit, then
    /// bind each unit's parameters. Releases anything held from a previous
    /// call first.
    pub fn prepare(&mut self, route: &RouteResult) -> ShardexResult<usize> {
        self.clear();
        self.groups = prepare_groups(
            self.provider.as_ref(),
            &route.units,
            self.config.max_connections_per_query,
        )?;
        self.units = route.units.clone();
        for (i, unit) in route.units.iter().enumerate() {
            if let Err(e) = self.bind_parameters(UnitIndex(i), &unit.parameters) {
                self.clear();
                return Err(e);
            }
        }
        Ok(self.units.len())
    }

    pub fn bind_parameters(&mut self, unit: UnitIndex, values: &[Datum]) -> ShardexResult<()> {
        let target = self
            .groups
            .iter_mut()
            .flat_map(|g| g.units.iter_mut())
            .find(|u| u.index == unit)
            .ok_or_else(|| ShardexError::state(format!("{} is not prepared", unit)))?;
        target.statement.set_parameters(values).map_err(|e| {
            let failure = UnitFailure {
                unit,
                shard: target.route_unit.shard.clone(),
                sql: target.route_unit.sql.clone(),
                error: Box::new(e),
            };
            ExecutionError::new(vec![failure], self.units.len()).into()
        })
    }

    fn ensure_prepared(&self) -> ShardexResult<()> {
        if self.groups.is_empty() {
            return Err(ShardexError::state("no prepared route units"));
        }
        Ok(())
    }

    pub fn execute_query(&mut self) -> ShardexResult<Vec<Box<dyn ShardCursor>>> {
        self.ensure_prepared()?;
        let outcomes = dispatch::dispatch(
            &mut self.groups,
            self.config.executor_size,
            &self.cancel,
            |unit, mode| {
                let cursor = unit.statement.execute_query()?;
                match mode {
                    ConnectionMode::MemoryStrictly => Ok(cursor),
                    ConnectionMode::ConnectionStrictly => {
                        Ok(Box::new(MemoryCursor::drain(cursor)?) as Box<dyn ShardCursor>)
                    }
                }
            },
        );
        dispatch::collect_outcomes(outcomes, |mut cursor| {
            let _ = cursor.close();
        })
    }

    pub fn execute_update(&mut self) -> ShardexResult<Vec<UpdateOutcome>> {
        self.ensure_prepared()?;
        let outcomes = dispatch::dispatch(
            &mut self.groups,
            self.config.executor_size,
            &self.cancel,
            |unit, _| unit.statement.execute_update(),
        );
        dispatch::collect_outcomes(outcomes, drop)
    }

    pub fn execute(&mut self) -> ShardexResult<Vec<PerShardResult>> {
        self.ensure_prepared()?;
        let outcomes = dispatch::dispatch(
            &mut self.groups,
            self.config.executor_size,
            &self.cancel,
            |unit, mode| match unit.statement.execute()? {
                ExecuteOutcome::Update(u) => Ok(PerShardResult::Update(u)),
                ExecuteOutcome::Rows(c) if mode == ConnectionMode::ConnectionStrictly => Ok(
                    PerShardResult::Query(Box::new(MemoryCursor::drain(c)?)),
                ),
                ExecuteOutcome::Rows(c) => Ok(PerShardResult::Query(c)),
            },
        );
        dispatch::collect_outcomes(outcomes, PerShardResult::close)
    }

    pub fn routed_units(&self) -> &[RouteUnit] {
        &self.units
    }

    pub fn groups(&self) -> &[ExecutionGroup] {
        &self.groups
    }

    /// Live physical statements currently held.
    pub fn statement_count(&self) -> usize {
        self.groups.iter().map(|g| g.units.len()).sum()
    }

    /// Close every physical statement and forget the route units.
    pub fn clear(&mut self) {
        for g in &mut self.groups {
            g.close();
        }
        self.groups.clear();
        self.units.clear();
    }
}

impl Drop for StatementExecutor {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::collect_rows;
    use crate::memory::MemoryConnectionProvider;
    use crate::parsed::{OtherStatement, ParsedStatement};

    fn route_of(units: Vec<(&str, &str)>) -> RouteResult {
        RouteResult {
            statement: Arc::new(ParsedStatement::Other(OtherStatement::new("SELECT 1", &[]))),
            units: units
                .into_iter()
                .map(|(shard, sql)| RouteUnit {
                    shard: ShardName::from(shard),
                    sql: sql.to_string(),
                    parameters: vec![Datum::Int64(7)],
                })
                .collect(),
            generated_key: None,
        }
    }

    fn executor(provider: &Arc<MemoryConnectionProvider>, max_conn: usize) -> StatementExecutor {
        StatementExecutor::new(
            provider.clone(),
            ExecutorConfig {
                executor_size: 4,
                max_connections_per_query: max_conn,
            },
            CancelToken::new(),
        )
    }

    #[test]
    fn test_groups_by_shard_and_picks_connection_mode() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1"]));
        let mut exec = executor(&provider, 1);
        exec.prepare(&route_of(vec![
            ("ds_0", "SELECT a FROM t_0"),
            ("ds_1", "SELECT a FROM t_1"),
            ("ds_0", "SELECT a FROM t_2"),
        ]))
        .unwrap();
        let modes: Vec<(String, ConnectionMode, usize)> = exec
            .groups()
            .iter()
            .map(|g| (g.shard.to_string(), g.mode, g.units().len()))
            .collect();
        assert_eq!(
            modes,
            vec![
                ("ds_0".to_string(), ConnectionMode::ConnectionStrictly, 2),
                ("ds_1".to_string(), ConnectionMode::MemoryStrictly, 1),
            ]
        );
        assert_eq!(provider.open_statements(), 3);
        exec.clear();
        assert_eq!(provider.open_statements(), 0);
    }

    #[test]
    fn test_connection_limit_splits_partitions() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0"]));
        let mut exec = executor(&provider, 2);
        exec.prepare(&route_of(vec![
            ("ds_0", "SELECT a FROM t_0"),
            ("ds_0", "SELECT a FROM t_1"),
        ]))
        .unwrap();
        assert_eq!(exec.groups().len(), 2);
        assert!(exec
            .groups()
            .iter()
            .all(|g| g.mode == ConnectionMode::MemoryStrictly));
    }

    #[test]
    fn test_parameters_bound_per_unit() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1"]));
        provider.on_update("ds_0", "UPDATE", 2);
        provider.on_update("ds_1", "UPDATE", 3);
        let mut exec = executor(&provider, 1);
        exec.prepare(&route_of(vec![
            ("ds_0", "UPDATE t_0 SET a = ?"),
            ("ds_1", "UPDATE t_1 SET a = ?"),
        ]))
        .unwrap();
        let outcomes = exec.execute_update().unwrap();
        let affected: Vec<u64> = outcomes.iter().map(|o| o.affected).collect();
        assert_eq!(affected, vec![2, 3]);
        assert!(provider
            .executed()
            .iter()
            .all(|e| e.params == vec![Datum::Int64(7)]));
    }

    #[test]
    fn test_connection_strictly_drains_cursors() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0"]));
        provider.on_query("ds_0", "t_0", &["a"], vec![vec![Datum::Int64(1)]]);
        provider.on_query("ds_0", "t_1", &["a"], vec![vec![Datum::Int64(2)]]);
        let mut exec = executor(&provider, 1);
        exec.prepare(&route_of(vec![
            ("ds_0", "SELECT a FROM t_0"),
            ("ds_0", "SELECT a FROM t_1"),
        ]))
        .unwrap();
        let mut cursors = exec.execute_query().unwrap();
        assert_eq!(provider.open_cursors(), 0);
        assert_eq!(collect_rows(cursors[1].as_mut()).unwrap().len(), 1);
    }

    #[test]
    fn test_failures_aggregated_in_unit_order() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1", "ds_2"]));
        provider.on_update("ds_0", "UPDATE", 1);
        provider.fail("ds_1", "UPDATE", "disk full");
        provider.fail("ds_2", "UPDATE", "timeout");
        let mut exec = executor(&provider, 1);
        exec.prepare(&route_of(vec![
            ("ds_0", "UPDATE t SET a = ?"),
            ("ds_1", "UPDATE t SET a = ?"),
            ("ds_2", "UPDATE t SET a = ?"),
        ]))
        .unwrap();
        let err = exec.execute_update().unwrap_err();
        let failed: Vec<usize> = err.unit_failures().iter().map(|f| f.unit.0).collect();
        assert_eq!(failed, vec![1, 2]);
        exec.clear();
        assert_eq!(provider.open_statements(), 0);
    }

    #[test]
    fn test_prepare_failure_releases_prepared_statements() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1"]));
        provider.fail_prepare("ds_1");
        let mut exec = executor(&provider, 1);
        let err = exec
            .prepare(&route_of(vec![
                ("ds_0", "SELECT a FROM t_0"),
                ("ds_1", "SELECT a FROM t_1"),
            ]))
            .unwrap_err();
        assert_eq!(err.unit_failures().len(), 1);
        assert_eq!(err.unit_failures()[0].shard, ShardName::from("ds_1"));
        assert_eq!(provider.open_statements(), 0);
        assert_eq!(exec.statement_count(), 0);
    }

    #[test]
    fn test_cancelled_units_fail_before_dispatch() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1"]));
        provider.on_update("ds_0", "UPDATE", 1);
        provider.on_update("ds_1", "UPDATE", 1);
        let mut exec = executor(&provider, 1);
        exec.prepare(&route_of(vec![
            ("ds_0", "UPDATE t SET a = ?"),
            ("ds_1", "UPDATE t SET a = ?"),
        ]))
        .unwrap();
        exec.cancel.cancel();
        let err = exec.execute_update().unwrap_err();
        assert!(err
            .unit_failures()
            .iter()
            .all(|f| matches!(*f.error, ShardexError::Cancelled)));
        assert!(provider.executed().is_empty());
    }

    #[test]
    fn test_execute_without_prepare_is_state_error() {
        let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0"]));
        let mut exec = executor(&provider, 1);
        assert!(matches!(exec.execute_update(), Err(ShardexError::State(_))));
    }
}
