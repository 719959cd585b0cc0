use std::sync::Arc;

use shardex_common::config::ExecutorConfig;
use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_common::types::{BatchCallId, ShardName};

use crate::connection::ConnectionProvider;
use crate::route::{GeneratedKeyInfo, RouteResult, RouteUnit};

use super::{dispatch, prepare_groups, CancelToken, ExecutionGroup};

/// Units of several `add_batch` calls that share shard and SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRouteUnit {
    pub shard: ShardName,
    pub sql: String,
    /// One parameter set per contributing unit, in arrival order.
    pub parameter_sets: Vec<Vec<Datum>>,
    /// The call that contributed each parameter set.
    pub call_ids: Vec<BatchCallId>,
}

pub struct BatchExecutor {
    provider: Arc<dyn ConnectionProvider>,
    config: ExecutorConfig,
    cancel: CancelToken,
    units: Vec<BatchRouteUnit>,
    calls: usize,
    key_infos: Vec<GeneratedKeyInfo>,
    native_keys: Vec<Vec<Datum>>,
    groups: Vec<ExecutionGroup>,
}

impl BatchExecutor {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        config: ExecutorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            config,
            cancel,
            units: Vec::new(),
            calls: 0,
            key_infos: Vec::new(),
            native_keys: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn add_batch(&mut self, route: &RouteResult) -> BatchCallId {
        let call = BatchCallId(self.calls);
        self.calls += 1;
        for unit in &route.units {
            match self
                .units
                .iter_mut()
                .find(|b| b.shard == unit.shard && b.sql == unit.sql)
            {
                Some(b) => {
                    b.parameter_sets.push(unit.parameters.clone());
                    b.call_ids.push(call);
                }
                None => self.units.push(BatchRouteUnit {
                    shard: unit.shard.clone(),
                    sql: unit.sql.clone(),
                    parameter_sets: vec![unit.parameters.clone()],
                    call_ids: vec![call],
                }),
            }
        }
        if let Some(info) = &route.generated_key {
            self.key_infos.push(info.clone());
        }
        call
    }

    /// Flush every accumulated call. Returns one count per call, in call
    /// order: the sum over its units when `accumulate`, otherwise the count
    /// reported by the last unit folded in.
    pub fn execute_batch(&mut self, accumulate: bool) -> ShardexResult<Vec<u64>> {
        if self.calls == 0 {
            return Ok(Vec::new());
        }
        self.release();
        self.native_keys.clear();

        let route_units: Vec<RouteUnit> = self
            .units
            .iter()
            .map(|b| RouteUnit {
                shard: b.shard.clone(),
                sql: b.sql.clone(),
                parameters: Vec::new(),
            })
            .collect();
        self.groups = prepare_groups(
            self.provider.as_ref(),
            &route_units,
            self.config.max_connections_per_query,
        )?;

        let units = &self.units;
        let outcomes = dispatch::dispatch(
            &mut self.groups,
            self.config.executor_size,
            &self.cancel,
            |unit, _| {
                let sets = &units[unit.index.0].parameter_sets;
                let statement = unit.statement();
                for params in sets {
                    statement.set_parameters(params)?;
                    statement.add_batch()?;
                }
                let counts = statement.execute_batch()?;
                Ok((counts, statement.batch_generated_keys()))
            },
        );
        let results = dispatch::collect_outcomes(outcomes, drop)?;

        let mut totals = vec![0u64; self.calls];
        for (unit, (counts, keys)) in self.units.iter().zip(results) {
            if counts.len() != unit.call_ids.len() {
                return Err(ShardexError::merge(format!(
                    "batch on {} returned {} counts for {} parameter sets",
                    unit.shard,
                    counts.len(),
                    unit.call_ids.len()
                )));
            }
            for (call, count) in unit.call_ids.iter().zip(counts) {
                if accumulate {
                    totals[call.0] += count;
                } else {
                    totals[call.0] = count;
                }
            }
            self.native_keys.push(keys);
        }
        tracing::debug!(calls = self.calls, units = self.units.len(), "batch executed");
        Ok(totals)
    }

    pub fn batch_units(&self) -> &[BatchRouteUnit] {
        &self.units
    }

    pub fn batch_count(&self) -> usize {
        self.calls
    }

    /// Generated-key infos of every call, in call order.
    pub fn key_infos(&self) -> &[GeneratedKeyInfo] {
        &self.key_infos
    }

    /// Keys the shards generated natively during the last flush, one entry
    /// per batch unit in batch-unit order.
    pub fn native_keys(&self) -> &[Vec<Datum>] {
        &self.native_keys
    }

    pub fn statement_count(&self) -> usize {
        self.groups.iter().map(|g| g.units().len()).sum()
    }

    /// Close the physical statements of the last flush, keeping keys.
    pub fn release(&mut self) {
        for g in &mut self.groups {
            g.close();
        }
        self.groups.clear();
    }

    /// Release statements and discard every accumulated call.
    pub fn clear(&mut self) {
        self.release();
        self.units.clear();
        self.calls = 0;
    }

    /// Forget the keys of the last flush.
    pub fn clear_keys(&mut self) {
        self.key_infos.clear();
        self.native_keys.clear();
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        self.release();
    }
}
