//! Result merge engine: combines per-shard cursors into the single cursor
//! a caller expects from one logical query.
//!
//! Strategy selection follows the query shape:
//! - one cursor of a plain SELECT is handed back untouched (`Direct`);
//! - GROUP BY or aggregates materialise through `GroupByMemory`;
//! - ORDER BY streams through a k-way heap merge (`OrderByStream`);
//! - anything else is concatenated in unit order (`Iterator`).
//!
//! Derived columns appended during routing are trimmed from the output, and
//! `LIMIT offset, count` is re-applied over the merged stream.

pub mod compare;
mod group_by;
mod iterator;
mod limit;
mod order_by;

use shardex_common::config::MergeConfig;
use shardex_common::datum::OwnedRow;
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_observability::record_merge_strategy;

use crate::cursor::{MemoryCursor, ShardCursor};
use crate::parsed::{
    avg_count_label, avg_sum_label, AggregationType, OrderByItem, Pagination, ParsedStatement,
    Projection, QueryKind, QueryShape,
};

use compare::SortKey;
use group_by::{merge_groups, ColumnFold, GroupByPlan};

pub use iterator::IteratorCursor;
pub use limit::LimitCursor;
pub use order_by::OrderByStreamCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Direct,
    Iterator,
    OrderByStream,
    GroupByMemory,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Direct => "direct",
            MergeStrategy::Iterator => "iterator",
            MergeStrategy::OrderByStream => "order_by_stream",
            MergeStrategy::GroupByMemory => "group_by_memory",
        }
    }
}

/// Close every cursor, reporting the first failure after trying them all.
pub(crate) fn close_all(cursors: &mut [Box<dyn ShardCursor>]) -> ShardexResult<()> {
    let mut first_err = None;
    for cursor in cursors.iter_mut() {
        if let Err(e) = cursor.close() {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// The caller-facing cursor of one logical query.
pub struct MergedCursor {
    inner: Box<dyn ShardCursor>,
    strategy: MergeStrategy,
    columns: Vec<String>,
    width: Option<usize>,
    closed: bool,
}

impl MergedCursor {
    fn new(inner: Box<dyn ShardCursor>, strategy: MergeStrategy, width: Option<usize>) -> Self {
        let mut columns = inner.columns().to_vec();
        if let Some(w) = width {
            columns.truncate(w);
        }
        Self {
            inner,
            strategy,
            columns,
            width,
            closed: false,
        }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ShardCursor for MergedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        if self.closed {
            return Err(ShardexError::state("result set is closed"));
        }
        let mut row = self.inner.next_row()?;
        if let (Some(row), Some(w)) = (row.as_mut(), self.width) {
            row.truncate(w);
        }
        Ok(row)
    }

    fn close(&mut self) -> ShardexResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

impl Drop for MergedCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge the per-unit cursors of `statement`, given in unit order.
    /// Every cursor is closed if the merge cannot be built.
    pub fn merge(
        &self,
        statement: &ParsedStatement,
        mut cursors: Vec<Box<dyn ShardCursor>>,
    ) -> ShardexResult<MergedCursor> {
        let merged = if cursors.is_empty() {
            let columns = statement
                .shape()
                .map(QueryShape::visible_labels)
                .unwrap_or_default();
            Ok(MergedCursor::new(
                Box::new(MemoryCursor::new(columns, Vec::new())),
                MergeStrategy::Iterator,
                None,
            ))
        } else if cursors.len() == 1 && statement.is_select() {
            let only = cursors.remove(0);
            Ok(MergedCursor::new(only, MergeStrategy::Direct, None))
        } else {
            match self.plan(statement, &cursors) {
                Ok(plan) => self.build(plan, cursors),
                Err(e) => {
                    let _ = close_all(&mut cursors);
                    Err(e)
                }
            }
        }?;
        record_merge_strategy(merged.strategy.as_str());
        tracing::debug!(strategy = merged.strategy.as_str(), "result merge selected");
        Ok(merged)
    }

    fn plan(
        &self,
        statement: &ParsedStatement,
        cursors: &[Box<dyn ShardCursor>],
    ) -> ShardexResult<MergePlan> {
        let columns = cursors[0].columns().to_vec();
        for (i, cursor) in cursors.iter().enumerate().skip(1) {
            let same = cursor.columns().len() == columns.len()
                && cursor
                    .columns()
                    .iter()
                    .zip(&columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b));
            if !same {
                return Err(ShardexError::merge(format!(
                    "unit {} returned columns {:?}, expected {:?}",
                    i,
                    cursor.columns(),
                    columns
                )));
            }
        }

        let shape = match statement {
            ParsedStatement::Query(q) if q.kind == QueryKind::Select => &q.shape,
            _ => {
                return Ok(MergePlan {
                    columns,
                    kind: PlanKind::Iterator,
                    width: None,
                    pagination: None,
                })
            }
        };

        let width = if shape.projections.is_empty() {
            None
        } else {
            if columns.len() < shape.visible_width() {
                return Err(ShardexError::merge(format!(
                    "shard cursors expose {} columns, query projects {}",
                    columns.len(),
                    shape.visible_width()
                )));
            }
            Some(shape.visible_width())
        };

        let kind = if shape.is_grouped() {
            let order_keys = sort_keys(shape, &shape.order_by, &columns)?;
            PlanKind::GroupBy(GroupByPlan {
                group_keys: sort_keys(shape, &shape.group_by, &columns)?,
                order_keys,
                folds: column_folds(shape, &columns)?,
                width,
                max_rows_buffered: self.config.max_rows_buffered,
            })
        } else if !shape.order_by.is_empty() {
            PlanKind::OrderBy(sort_keys(shape, &shape.order_by, &columns)?)
        } else {
            PlanKind::Iterator
        };

        Ok(MergePlan {
            columns,
            kind,
            width,
            pagination: shape.pagination,
        })
    }

    fn build(
        &self,
        plan: MergePlan,
        cursors: Vec<Box<dyn ShardCursor>>,
    ) -> ShardexResult<MergedCursor> {
        let (inner, strategy): (Box<dyn ShardCursor>, MergeStrategy) = match plan.kind {
            PlanKind::Iterator => (
                Box::new(IteratorCursor::new(plan.columns, cursors)),
                MergeStrategy::Iterator,
            ),
            PlanKind::OrderBy(keys) => (
                Box::new(OrderByStreamCursor::new(plan.columns, cursors, keys)?),
                MergeStrategy::OrderByStream,
            ),
            PlanKind::GroupBy(group_plan) => (
                Box::new(merge_groups(plan.columns, cursors, &group_plan)?),
                MergeStrategy::GroupByMemory,
            ),
        };
        let inner: Box<dyn ShardCursor> = match plan.pagination {
            Some(p) => Box::new(LimitCursor::new(inner, p)),
            None => inner,
        };
        Ok(MergedCursor::new(inner, strategy, plan.width))
    }
}

struct MergePlan {
    columns: Vec<String>,
    kind: PlanKind,
    width: Option<usize>,
    pagination: Option<Pagination>,
}

enum PlanKind {
    Iterator,
    OrderBy(Vec<SortKey>),
    GroupBy(GroupByPlan),
}

/// Position of `label` among the shard columns. Qualified names such as
/// `o.user_id` fall back to their unqualified suffix.
fn column_index(columns: &[String], label: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(label))
        .or_else(|| {
            let (_, suffix) = label.rsplit_once('.')?;
            columns.iter().position(|c| c.eq_ignore_ascii_case(suffix))
        })
}

fn sort_keys(
    shape: &QueryShape,
    items: &[OrderByItem],
    columns: &[String],
) -> ShardexResult<Vec<SortKey>> {
    items
        .iter()
        .map(|item| {
            let label = shape.resolve_label(&item.column);
            let index = column_index(columns, &label)
                .or_else(|| column_index(columns, &item.column))
                .ok_or_else(|| {
                    ShardexError::merge(format!(
                        "sort column {} not found in shard columns {:?}",
                        item.column, columns
                    ))
                })?;
            Ok(SortKey {
                index,
                direction: item.direction,
                nulls: item.nulls,
            })
        })
        .collect()
}

fn column_folds(shape: &QueryShape, columns: &[String]) -> ShardexResult<Vec<ColumnFold>> {
    let mut folds = vec![ColumnFold::First; columns.len()];
    for (i, projection) in shape.projections.iter().enumerate() {
        let Projection::Aggregation { func, .. } = projection else {
            continue;
        };
        folds[i] = match func {
            AggregationType::Count | AggregationType::Sum => ColumnFold::Add,
            AggregationType::Max => ColumnFold::Max,
            AggregationType::Min => ColumnFold::Min,
            AggregationType::Avg => {
                let find = |label: String| {
                    column_index(columns, &label).ok_or_else(|| {
                        ShardexError::merge(format!("derived column {} not found", label))
                    })
                };
                let count = find(avg_count_label(i))?;
                let sum = find(avg_sum_label(i))?;
                folds[count] = ColumnFold::Add;
                folds[sum] = ColumnFold::Add;
                ColumnFold::Avg { count, sum }
            }
        };
    }
    Ok(folds)
}
