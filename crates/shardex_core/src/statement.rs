//! The caller-facing logical statement.
//!
//! One `LogicalStatement` stands for one client statement object. Each call
//! routes the parsed statement, fans the route units out through the
//! execution coordinator and merges what comes back. The phase enum makes
//! the lifecycle explicit:
//!
//! ```text
//! Idle ─► Routed ─► Executing ─► QueryCompleted | UpdateCompleted
//! Idle ─► BatchAccumulating ─(add_batch)─► … ─(execute_batch)─► Idle
//! any ─(close)─► Closed
//! ```

use std::sync::Arc;
use std::time::Instant;

use shardex_common::config::ShardexConfig;
use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_common::types::BatchCallId;
use shardex_observability::{record_route_fanout, record_statement_metrics};

use crate::connection::{ConnectionProvider, UpdateOutcome};
use crate::cursor::ShardCursor;
use crate::execute::{BatchExecutor, CancelToken, PerShardResult, StatementExecutor};
use crate::generated_keys::{GeneratedKeyReconciler, GeneratedKeysCursor};
use crate::merge::{MergeEngine, MergedCursor};
use crate::parsed::ParsedStatement;
use crate::route::{RouteResult, RouteUnit, RoutingEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPhase {
    Idle,
    Routed,
    Executing,
    QueryCompleted,
    UpdateCompleted,
    BatchAccumulating,
    Closed,
}

/// Where `generated_keys` reads from.
enum KeySource {
    None,
    Update {
        route: RouteResult,
        native: Vec<Vec<Datum>>,
    },
    Batch,
}

pub struct LogicalStatement {
    statement: Arc<ParsedStatement>,
    router: Arc<RoutingEngine>,
    merger: MergeEngine,
    executor: StatementExecutor,
    batch: BatchExecutor,
    cancel: CancelToken,
    parameters: Vec<Datum>,
    return_generated_keys: bool,
    accumulate: bool,
    sql_show: bool,
    phase: StatementPhase,
    route: Option<RouteResult>,
    result_set: Option<MergedCursor>,
    update_count: Option<u64>,
    keys: KeySource,
}

impl LogicalStatement {
    pub(crate) fn new(
        statement: ParsedStatement,
        router: Arc<RoutingEngine>,
        provider: Arc<dyn ConnectionProvider>,
        config: &ShardexConfig,
        accumulate: bool,
        return_generated_keys: bool,
    ) -> Self {
        let cancel = CancelToken::new();
        Self {
            statement: Arc::new(statement),
            router,
            merger: MergeEngine::new(config.merge.clone()),
            executor: StatementExecutor::new(
                provider.clone(),
                config.executor.clone(),
                cancel.clone(),
            ),
            batch: BatchExecutor::new(provider, config.executor.clone(), cancel.clone()),
            cancel,
            parameters: Vec::new(),
            return_generated_keys,
            accumulate,
            sql_show: config.sql_show,
            phase: StatementPhase::Idle,
            route: None,
            result_set: None,
            update_count: None,
            keys: KeySource::None,
        }
    }

    // ── parameters ──────────────────────────────────────────────────────────

    /// Bind the 0-based parameter `index`. Gaps are filled with NULL.
    pub fn set_parameter(&mut self, index: usize, value: impl Into<Datum>) -> ShardexResult<()> {
        self.ensure_open()?;
        if self.parameters.len() <= index {
            self.parameters.resize(index + 1, Datum::Null);
        }
        self.parameters[index] = value.into();
        Ok(())
    }

    pub fn set_parameters(&mut self, values: Vec<Datum>) -> ShardexResult<()> {
        self.ensure_open()?;
        self.parameters = values;
        Ok(())
    }

    pub fn clear_parameters(&mut self) -> ShardexResult<()> {
        self.ensure_open()?;
        self.parameters.clear();
        Ok(())
    }

    pub fn parameters(&self) -> &[Datum] {
        &self.parameters
    }

    // ── single-shot execution ───────────────────────────────────────────────

    /// Run a query and return its merged cursor. Shard statements stay open
    /// while the cursor is current.
    pub fn execute_query(&mut self) -> ShardexResult<&mut MergedCursor> {
        self.begin_call()?;
        if !self.statement.is_query() {
            return Err(ShardexError::unsupported(format!(
                "execute_query on a {} statement",
                self.statement.kind_label()
            )));
        }
        let started = Instant::now();
        let result = self.run_query();
        self.cancel.reset();
        record_statement_metrics("query", elapsed_us(started), result.is_ok());
        match result {
            Ok(cursor) => {
                self.phase = StatementPhase::QueryCompleted;
                Ok(self.result_set.insert(cursor))
            }
            Err(e) => {
                self.executor.clear();
                self.phase = StatementPhase::Idle;
                Err(e)
            }
        }
    }

    fn run_query(&mut self) -> ShardexResult<MergedCursor> {
        let route = self.route_current()?;
        self.phase = StatementPhase::Executing;
        self.executor.prepare(&route)?;
        let cursors = self.executor.execute_query()?;
        self.merger.merge(&route.statement, cursors)
    }

    /// Run a DML statement and return the affected-row count. Every shard
    /// statement is closed before this returns.
    pub fn execute_update(&mut self) -> ShardexResult<u64> {
        self.begin_call()?;
        if self.statement.is_query() {
            return Err(ShardexError::unsupported(
                "execute_update on a query statement",
            ));
        }
        let started = Instant::now();
        let result = self.run_update();
        self.executor.clear();
        self.cancel.reset();
        record_statement_metrics("update", elapsed_us(started), result.is_ok());
        match result {
            Ok(count) => {
                self.phase = StatementPhase::UpdateCompleted;
                Ok(count)
            }
            Err(e) => {
                self.phase = StatementPhase::Idle;
                Err(e)
            }
        }
    }

    fn run_update(&mut self) -> ShardexResult<u64> {
        let route = self.route_current()?;
        self.phase = StatementPhase::Executing;
        self.executor.prepare(&route)?;
        let outcomes = self.executor.execute_update()?;
        Ok(self.complete_update(route, outcomes))
    }

    fn complete_update(&mut self, route: RouteResult, outcomes: Vec<UpdateOutcome>) -> u64 {
        let count = if self.accumulate {
            outcomes.iter().map(|o| o.affected).sum()
        } else {
            outcomes.first().map(|o| o.affected).unwrap_or(0)
        };
        self.update_count = Some(count);
        self.keys = KeySource::Update {
            route,
            native: outcomes.into_iter().map(|o| o.generated_keys).collect(),
        };
        count
    }

    /// Run any statement. Returns true when it produced a result set, which
    /// is then available from `result_set`.
    pub fn execute(&mut self) -> ShardexResult<bool> {
        self.begin_call()?;
        let started = Instant::now();
        let result = self.run_execute();
        self.cancel.reset();
        record_statement_metrics("execute", elapsed_us(started), result.is_ok());
        match result {
            Ok(Some(cursor)) => {
                self.result_set = Some(cursor);
                self.phase = StatementPhase::QueryCompleted;
                Ok(true)
            }
            Ok(None) => {
                self.executor.clear();
                self.phase = StatementPhase::UpdateCompleted;
                Ok(false)
            }
            Err(e) => {
                self.executor.clear();
                self.phase = StatementPhase::Idle;
                Err(e)
            }
        }
    }

    fn run_execute(&mut self) -> ShardexResult<Option<MergedCursor>> {
        let route = self.route_current()?;
        self.phase = StatementPhase::Executing;
        self.executor.prepare(&route)?;
        let results = self.executor.execute()?;

        let mut cursors: Vec<Box<dyn ShardCursor>> = Vec::new();
        let mut updates: Vec<UpdateOutcome> = Vec::new();
        for r in results {
            match r {
                PerShardResult::Query(c) => cursors.push(c),
                PerShardResult::Update(u) => updates.push(u),
            }
        }
        if !cursors.is_empty() && !updates.is_empty() {
            for c in &mut cursors {
                let _ = c.close();
            }
            return Err(ShardexError::merge(format!(
                "{} units returned rows and {} returned update counts",
                cursors.len(),
                updates.len()
            )));
        }
        if cursors.is_empty() {
            self.complete_update(route, updates);
            return Ok(None);
        }
        self.merger.merge(&route.statement, cursors).map(Some)
    }

    /// The cursor of the last query. Repeated calls return the same cursor.
    pub fn result_set(&mut self) -> ShardexResult<&mut MergedCursor> {
        self.ensure_open()?;
        match (self.phase, self.result_set.as_mut()) {
            (StatementPhase::QueryCompleted, Some(cursor)) => Ok(cursor),
            (phase, _) => Err(ShardexError::state(format!(
                "no result set in phase {:?}",
                phase
            ))),
        }
    }

    /// Affected rows of the last update, `None` after a query.
    pub fn update_count(&self) -> Option<u64> {
        match self.phase {
            StatementPhase::UpdateCompleted => self.update_count,
            _ => None,
        }
    }

    /// Keys generated by the last update or batch, in logical row order.
    pub fn generated_keys(&self) -> ShardexResult<GeneratedKeysCursor> {
        self.ensure_open()?;
        match &self.keys {
            KeySource::None => Ok(GeneratedKeysCursor::empty()),
            KeySource::Update { route, native } => {
                GeneratedKeyReconciler::reconcile(route, native, self.return_generated_keys)
            }
            KeySource::Batch => GeneratedKeyReconciler::reconcile_batch(
                &self.statement,
                self.batch.key_infos(),
                self.batch.native_keys(),
                self.return_generated_keys,
            ),
        }
    }

    // ── batch ───────────────────────────────────────────────────────────────

    /// Route the bound parameters and queue them. Parameters are cleared
    /// afterwards so the next set can be bound.
    pub fn add_batch(&mut self) -> ShardexResult<BatchCallId> {
        self.ensure_open()?;
        if self.statement.is_query() {
            return Err(ShardexError::unsupported("add_batch on a query statement"));
        }
        if self.phase != StatementPhase::BatchAccumulating {
            self.reset_results()?;
            self.batch.clear();
            self.batch.clear_keys();
        }
        let route = self.route_current()?;
        let call = self.batch.add_batch(&route);
        self.route = Some(route);
        self.parameters.clear();
        self.phase = StatementPhase::BatchAccumulating;
        Ok(call)
    }

    /// Flush the queued calls. Returns one count per `add_batch` call, in
    /// call order. An empty batch returns no counts.
    pub fn execute_batch(&mut self) -> ShardexResult<Vec<u64>> {
        self.ensure_open()?;
        if self.phase != StatementPhase::BatchAccumulating {
            self.reset_results()?;
            self.phase = StatementPhase::Idle;
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let result = self.batch.execute_batch(self.accumulate);
        self.batch.clear();
        self.cancel.reset();
        record_statement_metrics("batch", elapsed_us(started), result.is_ok());
        self.phase = StatementPhase::Idle;
        match result {
            Ok(counts) => {
                self.keys = KeySource::Batch;
                Ok(counts)
            }
            Err(e) => {
                self.batch.clear_keys();
                Err(e)
            }
        }
    }

    /// Discard queued batch calls without executing them.
    pub fn clear_batch(&mut self) -> ShardexResult<()> {
        self.ensure_open()?;
        self.batch.clear();
        self.batch.clear_keys();
        if self.phase == StatementPhase::BatchAccumulating {
            self.phase = StatementPhase::Idle;
        }
        Ok(())
    }

    pub fn batch_count(&self) -> usize {
        self.batch.batch_count()
    }

    // ── introspection ───────────────────────────────────────────────────────

    /// Route units of the last routed call.
    pub fn routed_units(&self) -> &[RouteUnit] {
        self.route.as_ref().map(|r| r.units.as_slice()).unwrap_or(&[])
    }

    /// False when every referenced table is a broadcast table: update counts
    /// then come from one unit instead of being summed.
    pub fn is_accumulate(&self) -> bool {
        self.accumulate
    }

    /// Token for cancelling the call in progress from another thread. It is
    /// re-armed when the call returns.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> StatementPhase {
        self.phase
    }

    /// Physical statements currently held (single-shot and batch).
    pub fn open_statement_count(&self) -> usize {
        self.executor.statement_count() + self.batch.statement_count()
    }

    pub fn statement(&self) -> &ParsedStatement {
        &self.statement
    }

    /// Release every cursor and physical statement. Idempotent.
    pub fn close(&mut self) -> ShardexResult<()> {
        if self.phase == StatementPhase::Closed {
            return Ok(());
        }
        let closed = self.reset_results();
        self.batch.clear();
        self.batch.clear_keys();
        self.parameters.clear();
        self.route = None;
        self.phase = StatementPhase::Closed;
        tracing::debug!(sql = self.statement.sql(), "logical statement closed");
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.phase == StatementPhase::Closed
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn ensure_open(&self) -> ShardexResult<()> {
        if self.phase == StatementPhase::Closed {
            return Err(ShardexError::state("statement is closed"));
        }
        Ok(())
    }

    /// Common prologue of `execute*`: drop the previous call's state,
    /// including any pending batch.
    fn begin_call(&mut self) -> ShardexResult<()> {
        self.ensure_open()?;
        self.reset_results()?;
        self.batch.clear();
        self.batch.clear_keys();
        self.phase = StatementPhase::Idle;
        Ok(())
    }

    /// Close the current cursor and release single-shot handles.
    fn reset_results(&mut self) -> ShardexResult<()> {
        let closed = match self.result_set.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        };
        self.executor.clear();
        self.update_count = None;
        self.keys = KeySource::None;
        closed
    }

    fn route_current(&mut self) -> ShardexResult<RouteResult> {
        let route = self.router.route(&self.statement, &self.parameters)?;
        record_route_fanout(route.units.len());
        if self.sql_show {
            tracing::info!("Logic SQL: {}", self.statement.sql());
            for unit in &route.units {
                tracing::info!("Actual SQL: {}", unit);
            }
        }
        self.route = Some(route.clone());
        self.phase = StatementPhase::Routed;
        Ok(route)
    }
}

impl Drop for LogicalStatement {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close logical statement");
        }
    }
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
