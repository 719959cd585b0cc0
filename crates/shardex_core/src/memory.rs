//! An in-process `ConnectionProvider` with scripted per-shard responses.
//!
//! Responses are registered against SQL fragments; a statement uses the
//! response of the longest fragment its SQL contains. Every prepared
//! statement and opened cursor is counted so callers can assert that a
//! logical statement released everything it acquired.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use shardex_common::datum::{Datum, OwnedRow};
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_common::types::ShardName;

use crate::connection::{
    ConnectionProvider, ExecuteOutcome, PhysicalConnection, PhysicalStatement, UpdateOutcome,
};
use crate::cursor::{MemoryCursor, ShardCursor};

#[derive(Debug, Clone)]
enum Response {
    Rows {
        columns: Vec<String>,
        rows: Vec<OwnedRow>,
    },
    Update {
        affected: u64,
        native_keys: bool,
    },
    Fail(String),
}

/// One physical call observed by the provider.
#[derive(Debug, Clone)]
pub struct ExecutedSql {
    pub shard: ShardName,
    pub sql: String,
    pub params: Vec<Datum>,
    pub op: &'static str,
}

#[derive(Default)]
struct Counters {
    open_statements: AtomicUsize,
    open_cursors: AtomicUsize,
    prepared: AtomicUsize,
}

struct MemoryShard {
    name: ShardName,
    scripts: Mutex<Vec<(String, Response)>>,
    next_native_key: AtomicI64,
    fail_prepare: AtomicBool,
    unavailable: AtomicBool,
    log: Arc<Mutex<Vec<ExecutedSql>>>,
    counters: Arc<Counters>,
}

impl MemoryShard {
    fn respond(&self, sql: &str) -> ShardexResult<Response> {
        let scripts = self.scripts.lock();
        scripts
            .iter()
            .filter(|(fragment, _)| sql.contains(fragment.as_str()))
            .max_by_key(|(fragment, _)| fragment.len())
            .map(|(_, r)| r.clone())
            .ok_or_else(|| {
                ShardexError::connection(&self.name, format!("no scripted response for: {}", sql))
            })
    }
}

#[derive(Default)]
pub struct MemoryConnectionProvider {
    shards: DashMap<ShardName, Arc<MemoryShard>>,
    log: Arc<Mutex<Vec<ExecutedSql>>>,
    counters: Arc<Counters>,
}

impl MemoryConnectionProvider {
    pub fn new(shards: &[&str]) -> Self {
        let provider = Self::default();
        for s in shards {
            provider.add_shard(s);
        }
        provider
    }

    pub fn add_shard(&self, shard: &str) {
        self.shard(shard);
    }

    fn shard(&self, shard: &str) -> Arc<MemoryShard> {
        let name = ShardName::from(shard);
        self.shards
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(MemoryShard {
                    name,
                    scripts: Mutex::new(Vec::new()),
                    next_native_key: AtomicI64::new(1),
                    fail_prepare: AtomicBool::new(false),
                    unavailable: AtomicBool::new(false),
                    log: self.log.clone(),
                    counters: self.counters.clone(),
                })
            })
            .value()
            .clone()
    }

    fn script(&self, shard: &str, fragment: &str, response: Response) {
        self.shard(shard)
            .scripts
            .lock()
            .push((fragment.to_string(), response));
    }

    /// Queries on `shard` whose SQL contains `fragment` return these rows.
    pub fn on_query(&self, shard: &str, fragment: &str, columns: &[&str], rows: Vec<Vec<Datum>>) {
        self.script(
            shard,
            fragment,
            Response::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: rows.into_iter().map(OwnedRow::new).collect(),
            },
        );
    }

    /// Updates on `shard` whose SQL contains `fragment` report `affected` rows
    /// (per batch entry for batches).
    pub fn on_update(&self, shard: &str, fragment: &str, affected: u64) {
        self.script(
            shard,
            fragment,
            Response::Update {
                affected,
                native_keys: false,
            },
        );
    }

    /// Like `on_update`, and the shard generates one auto-increment key per
    /// affected row.
    pub fn on_insert_with_native_keys(&self, shard: &str, fragment: &str, affected: u64) {
        self.script(
            shard,
            fragment,
            Response::Update {
                affected,
                native_keys: true,
            },
        );
    }

    /// Any execution on `shard` whose SQL contains `fragment` fails.
    pub fn fail(&self, shard: &str, fragment: &str, message: &str) {
        self.script(shard, fragment, Response::Fail(message.to_string()));
    }

    pub fn fail_prepare(&self, shard: &str) {
        self.shard(shard).fail_prepare.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, shard: &str, unavailable: bool) {
        self.shard(shard)
            .unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    pub fn set_next_native_key(&self, shard: &str, next: i64) {
        self.shard(shard)
            .next_native_key
            .store(next, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<ExecutedSql> {
        self.log.lock().clone()
    }

    pub fn executed_on(&self, shard: &str) -> Vec<ExecutedSql> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.shard.as_str() == shard)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn open_statements(&self) -> usize {
        self.counters.open_statements.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.counters.open_cursors.load(Ordering::SeqCst)
    }

    /// Statements prepared since creation.
    pub fn prepared_statements(&self) -> usize {
        self.counters.prepared.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for MemoryConnectionProvider {
    fn connection(&self, shard: &ShardName) -> ShardexResult<Arc<dyn PhysicalConnection>> {
        let entry = self
            .shards
            .get(shard)
            .ok_or_else(|| ShardexError::connection(shard, "unknown shard"))?;
        if entry.unavailable.load(Ordering::SeqCst) {
            return Err(ShardexError::connection(shard, "shard unavailable"));
        }
        Ok(Arc::new(MemoryConnection {
            shard: entry.value().clone(),
        }))
    }
}

struct MemoryConnection {
    shard: Arc<MemoryShard>,
}

impl PhysicalConnection for MemoryConnection {
    fn shard(&self) -> &ShardName {
        &self.shard.name
    }

    fn prepare(&self, sql: &str) -> ShardexResult<Box<dyn PhysicalStatement>> {
        if self.shard.fail_prepare.load(Ordering::SeqCst) {
            return Err(ShardexError::connection(
                &self.shard.name,
                format!("prepare failed: {}", sql),
            ));
        }
        self.shard
            .counters
            .open_statements
            .fetch_add(1, Ordering::SeqCst);
        self.shard.counters.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStatement {
            shard: self.shard.clone(),
            sql: sql.to_string(),
            params: Vec::new(),
            batch: Vec::new(),
            batch_keys: Vec::new(),
            closed: false,
        }))
    }
}

struct MemoryStatement {
    shard: Arc<MemoryShard>,
    sql: String,
    params: Vec<Datum>,
    batch: Vec<Vec<Datum>>,
    batch_keys: Vec<Datum>,
    closed: bool,
}

impl MemoryStatement {
    fn check_open(&self) -> ShardexResult<()> {
        if self.closed {
            return Err(ShardexError::connection(
                &self.shard.name,
                "statement already closed",
            ));
        }
        Ok(())
    }

    fn record(&self, op: &'static str, params: Vec<Datum>) {
        self.shard.log.lock().push(ExecutedSql {
            shard: self.shard.name.clone(),
            sql: self.sql.clone(),
            params,
            op,
        });
    }

    fn native_keys(&self, count: u64) -> Vec<Datum> {
        let first = self
            .shard
            .next_native_key
            .fetch_add(count as i64, Ordering::SeqCst);
        (0..count as i64).map(|i| Datum::Int64(first + i)).collect()
    }

    fn open_cursor(&self, columns: Vec<String>, rows: Vec<OwnedRow>) -> Box<dyn ShardCursor> {
        self.shard
            .counters
            .open_cursors
            .fetch_add(1, Ordering::SeqCst);
        Box::new(TrackedCursor {
            inner: MemoryCursor::new(columns, rows),
            counters: self.shard.counters.clone(),
            closed: false,
        })
    }

    fn update(&self, affected: u64, native_keys: bool) -> UpdateOutcome {
        UpdateOutcome {
            affected,
            generated_keys: if native_keys {
                self.native_keys(affected)
            } else {
                Vec::new()
            },
        }
    }

    fn failed(&self, message: String) -> ShardexError {
        ShardexError::connection(&self.shard.name, message)
    }
}

impl PhysicalStatement for MemoryStatement {
    fn set_parameters(&mut self, params: &[Datum]) -> ShardexResult<()> {
        self.check_open()?;
        self.params = params.to_vec();
        Ok(())
    }

    fn execute_query(&mut self) -> ShardexResult<Box<dyn ShardCursor>> {
        self.check_open()?;
        self.record("query", self.params.clone());
        match self.shard.respond(&self.sql)? {
            Response::Rows { columns, rows } => Ok(self.open_cursor(columns, rows)),
            Response::Update { .. } => Err(self.failed(format!("not a query: {}", self.sql))),
            Response::Fail(msg) => Err(self.failed(msg)),
        }
    }

    fn execute_update(&mut self) -> ShardexResult<UpdateOutcome> {
        self.check_open()?;
        self.record("update", self.params.clone());
        match self.shard.respond(&self.sql)? {
            Response::Update {
                affected,
                native_keys,
            } => Ok(self.update(affected, native_keys)),
            Response::Rows { .. } => Err(self.failed(format!("not an update: {}", self.sql))),
            Response::Fail(msg) => Err(self.failed(msg)),
        }
    }

    fn execute(&mut self) -> ShardexResult<ExecuteOutcome> {
        self.check_open()?;
        self.record("execute", self.params.clone());
        match self.shard.respond(&self.sql)? {
            Response::Rows { columns, rows } => {
                Ok(ExecuteOutcome::Rows(self.open_cursor(columns, rows)))
            }
            Response::Update {
                affected,
                native_keys,
            } => Ok(ExecuteOutcome::Update(self.update(affected, native_keys))),
            Response::Fail(msg) => Err(self.failed(msg)),
        }
    }

    fn add_batch(&mut self) -> ShardexResult<()> {
        self.check_open()?;
        self.batch.push(std::mem::take(&mut self.params));
        Ok(())
    }

    fn execute_batch(&mut self) -> ShardexResult<Vec<u64>> {
        self.check_open()?;
        let entries = std::mem::take(&mut self.batch);
        for params in &entries {
            self.record("batch", params.clone());
        }
        match self.shard.respond(&self.sql)? {
            Response::Update {
                affected,
                native_keys,
            } => {
                if native_keys {
                    self.batch_keys = self.native_keys(affected * entries.len() as u64);
                }
                Ok(vec![affected; entries.len()])
            }
            Response::Rows { .. } => Err(self.failed(format!("not an update: {}", self.sql))),
            Response::Fail(msg) => Err(self.failed(msg)),
        }
    }

    fn batch_generated_keys(&mut self) -> Vec<Datum> {
        std::mem::take(&mut self.batch_keys)
    }

    fn close(&mut self) -> ShardexResult<()> {
        if !self.closed {
            self.closed = true;
            self.shard
                .counters
                .open_statements
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct TrackedCursor {
    inner: MemoryCursor,
    counters: Arc<Counters>,
    closed: bool,
}

impl ShardCursor for TrackedCursor {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        self.inner.next_row()
    }

    fn close(&mut self) -> ShardexResult<()> {
        if !self.closed {
            self.closed = true;
            self.counters.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.close()
    }
}
