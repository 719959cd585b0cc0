use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use shardex_common::datum::OwnedRow;
use shardex_common::error::ShardexResult;

use crate::cursor::ShardCursor;

use super::compare::{compare_rows, SortKey};

struct MergeEntry {
    row: OwnedRow,
    source: usize,
    keys: Arc<Vec<SortKey>>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Equal rows come out in unit order.
        compare_rows(&self.row, &other.row, self.keys.as_slice())
            .then(self.source.cmp(&other.source))
    }
}

/// Lazy k-way merge of individually sorted shard cursors.
pub struct OrderByStreamCursor {
    columns: Vec<String>,
    cursors: Vec<Box<dyn ShardCursor>>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    keys: Arc<Vec<SortKey>>,
}

impl OrderByStreamCursor {
    /// Reads the first row of every cursor.
    pub fn new(
        columns: Vec<String>,
        mut cursors: Vec<Box<dyn ShardCursor>>,
        keys: Vec<SortKey>,
    ) -> ShardexResult<Self> {
        let keys = Arc::new(keys);
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            match cursor.next_row() {
                Ok(Some(row)) => heap.push(Reverse(MergeEntry {
                    row,
                    source,
                    keys: keys.clone(),
                })),
                Ok(None) => {}
                Err(e) => {
                    let _ = super::close_all(&mut cursors);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            columns,
            cursors,
            heap,
            keys,
        })
    }
}

impl ShardCursor for OrderByStreamCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(row) = self.cursors[entry.source].next_row()? {
            self.heap.push(Reverse(MergeEntry {
                row,
                source: entry.source,
                keys: self.keys.clone(),
            }));
        }
        Ok(Some(entry.row))
    }

    fn close(&mut self) -> ShardexResult<()> {
        self.heap.clear();
        super::close_all(&mut self.cursors)
    }
}
