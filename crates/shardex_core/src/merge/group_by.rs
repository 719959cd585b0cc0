use std::collections::HashMap;

use shardex_common::datum::{Datum, OwnedRow};
use shardex_common::error::{ShardexError, ShardexResult};

use crate::cursor::{MemoryCursor, ShardCursor};

use super::compare::{compare_rows, encode_group_key, SortKey};

/// How one column of the shard rows folds into its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFold {
    /// Value of the first row seen for the group.
    First,
    /// COUNT and SUM partials are added.
    Add,
    Max,
    Min,
    /// Recomputed from the summed derived count and sum columns.
    Avg { count: usize, sum: usize },
}

/// Materialising group-by merge plan.
pub struct GroupByPlan {
    pub group_keys: Vec<SortKey>,
    pub order_keys: Vec<SortKey>,
    pub folds: Vec<ColumnFold>,
    pub width: Option<usize>,
    pub max_rows_buffered: usize,
}

struct GroupState {
    row: Vec<Datum>,
}

impl GroupState {
    fn fold(&mut self, values: Vec<Datum>, folds: &[ColumnFold]) -> ShardexResult<()> {
        for (i, value) in values.into_iter().enumerate() {
            let Some(acc) = self.row.get_mut(i) else {
                break;
            };
            match folds.get(i).copied().unwrap_or(ColumnFold::First) {
                ColumnFold::First | ColumnFold::Avg { .. } => {}
                ColumnFold::Add => {
                    *acc = acc.add(&value).ok_or_else(|| {
                        ShardexError::merge(format!(
                            "cannot add {} to {} while merging column {}: non-numeric or overflow",
                            value.type_name(),
                            acc.type_name(),
                            i
                        ))
                    })?;
                }
                ColumnFold::Max => {
                    if !value.is_null() && (acc.is_null() || value > *acc) {
                        *acc = value;
                    }
                }
                ColumnFold::Min => {
                    if !value.is_null() && (acc.is_null() || value < *acc) {
                        *acc = value;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(mut self, folds: &[ColumnFold]) -> OwnedRow {
        for (i, fold) in folds.iter().enumerate() {
            if let ColumnFold::Avg { count, sum } = *fold {
                let avg = average(self.row.get(count), self.row.get(sum));
                if let Some(slot) = self.row.get_mut(i) {
                    *slot = avg;
                }
            }
        }
        OwnedRow::new(self.row)
    }
}

fn average(count: Option<&Datum>, sum: Option<&Datum>) -> Datum {
    let count = count.and_then(Datum::as_f64).unwrap_or(0.0);
    match sum.and_then(Datum::as_f64) {
        Some(sum) if count != 0.0 => Datum::Float64(sum / count),
        _ => Datum::Null,
    }
}

/// Drain every cursor, fold rows by group key and return the sorted groups.
/// The source cursors are closed on every path.
pub fn merge_groups(
    columns: Vec<String>,
    mut cursors: Vec<Box<dyn ShardCursor>>,
    plan: &GroupByPlan,
) -> ShardexResult<MemoryCursor> {
    let folded = fold_all(&mut cursors, plan);
    let closed = super::close_all(&mut cursors);
    let mut groups = folded?;
    closed?;

    let keys = if plan.order_keys.is_empty() {
        &plan.group_keys
    } else {
        &plan.order_keys
    };
    groups.sort_by(|a, b| compare_rows(a, b, keys));

    let columns = match plan.width {
        Some(w) => {
            for row in &mut groups {
                row.truncate(w);
            }
            columns.into_iter().take(w).collect()
        }
        None => columns,
    };
    Ok(MemoryCursor::new(columns, groups))
}

fn fold_all(
    cursors: &mut [Box<dyn ShardCursor>],
    plan: &GroupByPlan,
) -> ShardexResult<Vec<OwnedRow>> {
    let group_indices: Vec<usize> = plan.group_keys.iter().map(|k| k.index).collect();
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut groups: Vec<GroupState> = Vec::new();
    let mut buffered = 0usize;

    for cursor in cursors.iter_mut() {
        while let Some(row) = cursor.next_row()? {
            buffered += 1;
            if buffered > plan.max_rows_buffered {
                return Err(ShardexError::merge(format!(
                    "group merge exceeded max_rows_buffered ({})",
                    plan.max_rows_buffered
                )));
            }
            let key = encode_group_key(&group_indices, &row.values);
            match index.get(&key) {
                Some(&slot) => groups[slot].fold(row.values, &plan.folds)?,
                None => {
                    index.insert(key, groups.len());
                    groups.push(GroupState { row: row.values });
                }
            }
        }
    }
    Ok(groups
        .into_iter()
        .map(|g| g.finish(&plan.folds))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::collect_rows;
    use crate::parsed::{Direction, NullOrdering};

    fn shard(rows: Vec<Vec<Datum>>) -> Box<dyn ShardCursor> {
        Box::new(MemoryCursor::new(
            vec!["user_id".into(), "COUNT(*)".into(), "MAX(amount)".into()],
            rows.into_iter().map(OwnedRow::new).collect(),
        ))
    }

    fn plan(max_rows: usize) -> GroupByPlan {
        GroupByPlan {
            group_keys: vec![SortKey {
                index: 0,
                direction: Direction::Asc,
                nulls: NullOrdering::First,
            }],
            order_keys: vec![],
            folds: vec![ColumnFold::First, ColumnFold::Add, ColumnFold::Max],
            width: None,
            max_rows_buffered: max_rows,
        }
    }

    #[test]
    fn test_groups_fold_across_shards_and_sort_by_group_key() {
        let cursors = vec![
            shard(vec![
                vec![Datum::Int64(2), Datum::Int64(3), Datum::Int64(10)],
                vec![Datum::Int64(1), Datum::Int64(1), Datum::Int64(7)],
            ]),
            shard(vec![vec![Datum::Int64(2), Datum::Int64(4), Datum::Int64(12)]]),
        ];
        let mut merged = merge_groups(
            vec!["user_id".into(), "COUNT(*)".into(), "MAX(amount)".into()],
            cursors,
            &plan(100),
        )
        .unwrap();
        let rows = collect_rows(&mut merged).unwrap();
        assert_eq!(
            rows,
            vec![
                OwnedRow::new(vec![Datum::Int64(1), Datum::Int64(1), Datum::Int64(7)]),
                OwnedRow::new(vec![Datum::Int64(2), Datum::Int64(7), Datum::Int64(12)]),
            ]
        );
    }

    #[test]
    fn test_max_ignores_nulls() {
        let cursors = vec![
            shard(vec![vec![Datum::Int64(1), Datum::Int64(1), Datum::Int64(5)]]),
            shard(vec![vec![Datum::Int64(1), Datum::Int64(0), Datum::Null]]),
        ];
        let mut merged = merge_groups(
            vec!["user_id".into(), "COUNT(*)".into(), "MAX(amount)".into()],
            cursors,
            &plan(100),
        )
        .unwrap();
        let rows = collect_rows(&mut merged).unwrap();
        assert_eq!(rows[0].values[2].as_i64(), Some(5));
    }

    #[test]
    fn test_row_cap_is_a_merge_error() {
        let cursors = vec![shard(vec![
            vec![Datum::Int64(1), Datum::Int64(1), Datum::Int64(1)],
            vec![Datum::Int64(2), Datum::Int64(1), Datum::Int64(1)],
        ])];
        let err = merge_groups(vec!["a".into(), "b".into(), "c".into()], cursors, &plan(1))
            .err()
            .unwrap();
        assert!(matches!(err, ShardexError::Merge(_)));
    }

    #[test]
    fn test_sum_overflow_is_a_merge_error() {
        let cursors = vec![
            shard(vec![vec![Datum::Int64(1), Datum::Int64(i64::MAX), Datum::Int64(1)]]),
            shard(vec![vec![Datum::Int64(1), Datum::Int64(1), Datum::Int64(1)]]),
        ];
        let err = merge_groups(
            vec!["user_id".into(), "COUNT(*)".into(), "MAX(amount)".into()],
            cursors,
            &plan(100),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ShardexError::Merge(_)));
    }

    #[test]
    fn test_average_of_empty_group_is_null() {
        assert!(average(Some(&Datum::Int64(0)), Some(&Datum::Null)).is_null());
        assert!(matches!(
            average(Some(&Datum::Int64(4)), Some(&Datum::Int64(10))),
            Datum::Float64(v) if (v - 2.5).abs() < f64::EPSILON
        ));
    }
}
