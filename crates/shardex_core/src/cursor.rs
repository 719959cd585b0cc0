//! Forward-only row cursors.

use std::collections::VecDeque;

use shardex_common::datum::OwnedRow;
use shardex_common::error::ShardexResult;

/// A forward-only cursor over one result set.
///
/// `close` must be idempotent; merged cursors close their sources eagerly
/// when exhausted and again on their own close.
pub trait ShardCursor: Send {
    /// Column labels, in select-list order.
    fn columns(&self) -> &[String];

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>>;

    fn close(&mut self) -> ShardexResult<()>;
}

/// A fully materialised cursor.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursor {
    columns: Vec<String>,
    rows: VecDeque<OwnedRow>,
}

impl MemoryCursor {
    pub fn new(columns: Vec<String>, rows: Vec<OwnedRow>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Read `source` to the end and close it.
    pub fn drain(mut source: Box<dyn ShardCursor>) -> ShardexResult<Self> {
        let columns = source.columns().to_vec();
        let mut rows = VecDeque::new();
        let read = loop {
            match source.next_row() {
                Ok(Some(row)) => rows.push_back(row),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = source.close();
        read?;
        closed?;
        Ok(Self { columns, rows })
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl ShardCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> ShardexResult<()> {
        self.rows.clear();
        Ok(())
    }
}

/// Collect every remaining row of `cursor` (test and tooling helper).
pub fn collect_rows(cursor: &mut dyn ShardCursor) -> ShardexResult<Vec<OwnedRow>> {
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}
