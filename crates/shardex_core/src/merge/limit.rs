use shardex_common::datum::OwnedRow;
use shardex_common::error::ShardexResult;

use crate::cursor::ShardCursor;
use crate::parsed::Pagination;

/// Skips `offset` merged rows, then yields at most `row_count`.
pub struct LimitCursor {
    inner: Box<dyn ShardCursor>,
    skip: u64,
    remaining: u64,
}

impl LimitCursor {
    pub fn new(inner: Box<dyn ShardCursor>, pagination: Pagination) -> Self {
        Self {
            inner,
            skip: pagination.offset,
            remaining: pagination.row_count,
        }
    }
}

impl ShardCursor for LimitCursor {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        while self.skip > 0 {
            self.skip -= 1;
            if self.inner.next_row()?.is_none() {
                self.skip = 0;
                self.remaining = 0;
                return Ok(None);
            }
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.inner.next_row()
    }

    fn close(&mut self) -> ShardexResult<()> {
        self.inner.close()
    }
}
