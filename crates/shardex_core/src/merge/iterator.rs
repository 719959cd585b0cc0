use shardex_common::datum::OwnedRow;
use shardex_common::error::ShardexResult;

use crate::cursor::ShardCursor;

/// Pass-through merge: each cursor is exhausted before the next, in unit order.
pub struct IteratorCursor {
    columns: Vec<String>,
    cursors: Vec<Box<dyn ShardCursor>>,
    current: usize,
}

impl IteratorCursor {
    pub fn new(columns: Vec<String>, cursors: Vec<Box<dyn ShardCursor>>) -> Self {
        Self {
            columns,
            cursors,
            current: 0,
        }
    }
}

impl ShardCursor for IteratorCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        while let Some(cursor) = self.cursors.get_mut(self.current) {
            if let Some(row) = cursor.next_row()? {
                return Ok(Some(row));
            }
            cursor.close()?;
            self.current += 1;
        }
        Ok(None)
    }

    fn close(&mut self) -> ShardexResult<()> {
        super::close_all(&mut self.cursors)
    }
}
