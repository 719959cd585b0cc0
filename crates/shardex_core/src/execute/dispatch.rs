//! Fan-out of execution groups onto scoped worker threads.

use shardex_common::error::{ExecutionError, ShardexError, ShardexResult, UnitFailure};
use shardex_common::types::{ShardName, UnitIndex};

use super::{CancelToken, ConnectionMode, ExecutionGroup, ExecutionUnit};

pub(crate) struct UnitOutcome<T> {
    pub index: UnitIndex,
    pub shard: ShardName,
    pub sql: String,
    pub result: ShardexResult<T>,
}

fn run_group<T, F>(group: &mut ExecutionGroup, cancel: &CancelToken, run: &F) -> Vec<UnitOutcome<T>>
where
    F: Fn(&mut ExecutionUnit, ConnectionMode) -> ShardexResult<T>,
{
    let mode = group.mode;
    group
        .units
        .iter_mut()
        .map(|unit| {
            let result = if cancel.is_cancelled() {
                Err(ShardexError::Cancelled)
            } else {
                run(unit, mode)
            };
            UnitOutcome {
                index: unit.index,
                shard: unit.route_unit.shard.clone(),
                sql: unit.route_unit.sql.clone(),
                result,
            }
        })
        .collect()
}

/// Run `run` for every unit of every group. Units of one group run serially
/// on one worker; groups run in parallel on at most `executor_size` scoped
/// threads. A single group (or a single worker) runs inline on the caller.
pub(crate) fn dispatch<T, F>(
    groups: &mut [ExecutionGroup],
    executor_size: usize,
    cancel: &CancelToken,
    run: F,
) -> Vec<UnitOutcome<T>>
where
    T: Send,
    F: Fn(&mut ExecutionUnit, ConnectionMode) -> ShardexResult<T> + Sync,
{
    let total: usize = groups.iter().map(|g| g.units.len()).sum();
    if total <= 1 || groups.len() <= 1 || executor_size <= 1 {
        return groups
            .iter_mut()
            .flat_map(|g| run_group(g, cancel, &run))
            .collect();
    }

    let workers = executor_size.min(groups.len());
    let per_worker = groups.len().div_ceil(workers);
    tracing::debug!(groups = groups.len(), units = total, workers, "dispatching in parallel");

    std::thread::scope(|s| {
        let handles: Vec<_> = groups
            .chunks_mut(per_worker)
            .map(|chunk| {
                let owned: Vec<(UnitIndex, ShardName, String)> = chunk
                    .iter()
                    .flat_map(|g| g.units.iter())
                    .map(|u| (u.index, u.route_unit.shard.clone(), u.route_unit.sql.clone()))
                    .collect();
                let run = &run;
                let handle = s.spawn(move || {
                    chunk
                        .iter_mut()
                        .flat_map(|g| run_group(g, cancel, run))
                        .collect::<Vec<_>>()
                });
                (owned, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(owned, h)| {
                h.join().unwrap_or_else(|_| {
                    owned
                        .into_iter()
                        .map(|(index, shard, sql)| UnitOutcome {
                            index,
                            result: Err(ShardexError::internal_bug(
                                "E-EXEC-001",
                                "worker thread panicked during dispatch",
                                format!("unit={} shard={}", index, shard),
                            )),
                            shard,
                            sql,
                        })
                        .collect()
                })
            })
            .collect()
    })
}

/// Order outcomes by unit and split successes from failures. When anything
/// failed, successful values are handed to `discard` and the failing subset
/// is returned as one `ExecutionError`.
pub(crate) fn collect_outcomes<T>(
    mut outcomes: Vec<UnitOutcome<T>>,
    mut discard: impl FnMut(T),
) -> ShardexResult<Vec<T>> {
    outcomes.sort_by_key(|o| o.index);
    let total = outcomes.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for o in outcomes {
        match o.result {
            Ok(v) => values.push(v),
            Err(e) => {
                tracing::warn!(unit = %o.index, shard = %o.shard, error = %e, "route unit failed");
                failures.push(UnitFailure {
                    unit: o.index,
                    shard: o.shard,
                    sql: o.sql,
                    error: Box::new(e),
                });
            }
        }
    }
    if failures.is_empty() {
        return Ok(values);
    }
    shardex_observability::record_unit_failures(failures.len());
    values.into_iter().for_each(&mut discard);
    Err(ExecutionError::new(failures, total).into())
}
