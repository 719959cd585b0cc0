#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;

pub use shardex_common::config::ShardexConfig;
pub use shardex_common::datum::{Datum, OwnedRow};
pub use shardex_common::error::ShardexError;
pub use shardex_common::types::{ShardName, UnitIndex};
pub use shardex_core::parsed::{OrderByItem, Projection, QueryStatement, ShardingCondition, ValueRef};
pub use shardex_core::*;

/// Two shards; `t_order`/`t_order_item` bound and split in two, `t_user`
/// split in four, `t_config` broadcast.
pub fn rule() -> StaticShardingRule {
    StaticShardingRule::new()
        .with_table(
            TableRule::new("t_order", spread_nodes("t_order", &["ds_0", "ds_1"], 2))
                .sharded_by("user_id", ShardingAlgorithm::Modulo),
        )
        .with_table(
            TableRule::new("t_order_item", spread_nodes("t_order_item", &["ds_0", "ds_1"], 2))
                .sharded_by("user_id", ShardingAlgorithm::Modulo),
        )
        .with_table(
            TableRule::new("t_user", spread_nodes("t_user", &["ds_0", "ds_1"], 4))
                .sharded_by("id", ShardingAlgorithm::Modulo),
        )
        .with_binding_group(&["t_order", "t_order_item"])
        .with_broadcast_table("t_config", &["ds_0", "ds_1"])
}

pub fn config(max_connections_per_query: usize) -> ShardexConfig {
    let mut config = ShardexConfig::default();
    config.executor.executor_size = 4;
    config.executor.max_connections_per_query = max_connections_per_query;
    config.sql_show = true;
    config
}

pub fn setup_with(config: ShardexConfig) -> (Arc<MemoryConnectionProvider>, ShardingContext) {
    let provider = Arc::new(MemoryConnectionProvider::new(&["ds_0", "ds_1"]));
    let ctx = ShardingContext::with_key_generator(
        Arc::new(rule()),
        provider.clone(),
        config,
        Arc::new(IncrementKeyGenerator::starting_at(101)),
    )
    .unwrap();
    (provider, ctx)
}

pub fn setup() -> (Arc<MemoryConnectionProvider>, ShardingContext) {
    setup_with(config(1))
}

pub fn ints(rows: &[OwnedRow], col: usize) -> Vec<i64> {
    rows.iter().map(|r| r.values[col].as_i64().unwrap()).collect()
}

pub fn int_rows(values: &[i64]) -> Vec<Vec<Datum>> {
    values.iter().map(|v| vec![Datum::Int64(*v)]).collect()
}

pub fn select_ids_ordered() -> ParsedStatement {
    ParsedStatement::Query(
        QueryStatement::select("SELECT id FROM t_order ORDER BY id", &["t_order"])
            .with_projections(vec![Projection::column("id")])
            .with_order_by(vec![OrderByItem::asc("id")]),
    )
}

pub fn update_all(table: &str) -> ParsedStatement {
    ParsedStatement::Update(DmlStatement::new(
        &format!("UPDATE {} SET status = 'x'", table),
        &[table],
    ))
}
