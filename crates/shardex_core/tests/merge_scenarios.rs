//! End-to-end query merges over the in-memory provider.

mod common;

use common::*;
use shardex_core::parsed::AggregationType;

#[test]
fn test_ordered_merge_across_two_shards() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0", &["id"], int_rows(&[1, 3, 5]));
    provider.on_query("ds_1", "t_order_1", &["id"], int_rows(&[2, 4, 6]));

    let mut stmt = ctx.prepare_statement(select_ids_ordered());
    let cursor = stmt.execute_query().unwrap();
    assert_eq!(cursor.strategy(), MergeStrategy::OrderByStream);
    let rows = collect_rows(cursor).unwrap();
    assert_eq!(ints(&rows, 0), vec![1, 2, 3, 4, 5, 6]);

    assert_eq!(provider.open_statements(), 2);
    stmt.close().unwrap();
    assert_eq!(provider.open_statements(), 0);
    assert_eq!(provider.open_cursors(), 0);
}

#[test]
fn test_single_unit_query_returns_shard_cursor_unchanged() {
    let (provider, ctx) = setup();
    provider.on_query(
        "ds_1",
        "t_order_1",
        &["id", "user_id"],
        vec![
            vec![Datum::Int64(9), Datum::Int64(3)],
            vec![Datum::Int64(7), Datum::Int64(3)],
        ],
    );

    let query = QueryStatement::select("SELECT id, user_id FROM t_order WHERE user_id = ? ORDER BY id", &["t_order"])
        .with_condition(ShardingCondition::equal("t_order", "user_id", ValueRef::Param(0)))
        .with_projections(vec![Projection::column("id"), Projection::column("user_id")])
        .with_order_by(vec![OrderByItem::asc("id")]);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));
    stmt.set_parameter(0, 3i64).unwrap();

    let cursor = stmt.execute_query().unwrap();
    assert_eq!(cursor.strategy(), MergeStrategy::Direct);
    assert_eq!(cursor.columns(), &["id".to_string(), "user_id".to_string()]);
    // Row order is whatever the shard produced.
    let rows = collect_rows(cursor).unwrap();
    assert_eq!(ints(&rows, 0), vec![9, 7]);
    assert_eq!(stmt.routed_units().len(), 1);
    assert!(provider.executed_on("ds_0").is_empty());
}

#[test]
fn test_aggregation_merge_recombines_partials() {
    let (provider, ctx) = setup();
    let columns = [
        "status",
        "COUNT(*)",
        "SUM(amount)",
        "AVG(amount)",
        "AVG_DERIVED_COUNT_3",
        "AVG_DERIVED_SUM_3",
    ];
    let row = |status: &str, count: i64, sum: i64, avg: f64| {
        vec![
            Datum::from(status),
            Datum::Int64(count),
            Datum::Int64(sum),
            Datum::Float64(avg),
            Datum::Int64(count),
            Datum::Int64(sum),
        ]
    };
    provider.on_query(
        "ds_0",
        "t_order_0",
        &columns,
        vec![row("paid", 2, 30, 15.0), row("new", 1, 10, 10.0)],
    );
    provider.on_query("ds_1", "t_order_1", &columns, vec![row("paid", 1, 60, 60.0)]);

    let query = QueryStatement::select(
        "SELECT status, COUNT(*), SUM(amount), AVG(amount) FROM t_order GROUP BY status",
        &["t_order"],
    )
    .with_projections(vec![
        Projection::column("status"),
        Projection::aggregation(AggregationType::Count, "*", None),
        Projection::aggregation(AggregationType::Sum, "amount", None),
        Projection::aggregation(AggregationType::Avg, "amount", None),
    ])
    .with_group_by(vec![OrderByItem::asc("status")]);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let cursor = stmt.execute_query().unwrap();
    assert_eq!(cursor.strategy(), MergeStrategy::GroupByMemory);
    assert_eq!(cursor.columns().len(), 4);
    let rows = collect_rows(cursor).unwrap();
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].values[0].as_str(), Some("new"));
    assert_eq!(rows[0].values[1].as_i64(), Some(1));
    assert_eq!(rows[0].values[2].as_i64(), Some(10));
    assert_eq!(rows[0].values[3].as_f64(), Some(10.0));

    assert_eq!(rows[1].values[0].as_str(), Some("paid"));
    assert_eq!(rows[1].values[1].as_i64(), Some(3));
    assert_eq!(rows[1].values[2].as_i64(), Some(90));
    // 90 / 3, not the mean of 15.0 and 60.0.
    assert_eq!(rows[1].values[3].as_f64(), Some(30.0));
    assert!(rows.iter().all(|r| r.len() == 4));

    let sql = &provider.executed_on("ds_0")[0].sql;
    assert!(sql.contains("COUNT(amount) AS AVG_DERIVED_COUNT_3"));
    assert!(sql.contains("SUM(amount) AS AVG_DERIVED_SUM_3"));
}

#[test]
fn test_pagination_applies_after_merge() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0", &["id"], int_rows(&[1, 3, 5]));
    provider.on_query("ds_1", "t_order_1", &["id"], int_rows(&[2, 4, 6]));

    let query = QueryStatement::select("SELECT id FROM t_order ORDER BY id LIMIT 2, 2", &["t_order"])
        .with_projections(vec![Projection::column("id")])
        .with_order_by(vec![OrderByItem::asc("id")])
        .with_pagination(2, 2);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let rows = collect_rows(stmt.execute_query().unwrap()).unwrap();
    assert_eq!(ints(&rows, 0), vec![3, 4]);
    assert!(provider
        .executed()
        .iter()
        .all(|e| e.sql.ends_with("ORDER BY id LIMIT 4")));
}

#[test]
fn test_order_by_column_outside_projection_is_hidden() {
    let (provider, ctx) = setup();
    let columns = ["id", "ORDER_BY_DERIVED_0"];
    provider.on_query(
        "ds_0",
        "t_order_0",
        &columns,
        vec![
            vec![Datum::Int64(10), Datum::Int64(300)],
            vec![Datum::Int64(11), Datum::Int64(100)],
        ],
    );
    provider.on_query(
        "ds_1",
        "t_order_1",
        &columns,
        vec![vec![Datum::Int64(20), Datum::Int64(200)]],
    );

    let query = QueryStatement::select("SELECT id FROM t_order ORDER BY created DESC", &["t_order"])
        .with_projections(vec![Projection::column("id")])
        .with_order_by(vec![OrderByItem::desc("created")]);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let cursor = stmt.execute_query().unwrap();
    assert_eq!(cursor.columns(), &["id".to_string()]);
    let rows = collect_rows(cursor).unwrap();
    assert_eq!(ints(&rows, 0), vec![10, 20, 11]);
    assert!(rows.iter().all(|r| r.len() == 1));
}

#[test]
fn test_pass_through_keeps_unit_order() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0", &["id"], int_rows(&[3, 1]));
    provider.on_query("ds_1", "t_order_1", &["id"], int_rows(&[2]));

    let query = QueryStatement::select("SELECT id FROM t_order", &["t_order"])
        .with_projections(vec![Projection::column("id")]);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let cursor = stmt.execute_query().unwrap();
    assert_eq!(cursor.strategy(), MergeStrategy::Iterator);
    assert_eq!(ints(&collect_rows(cursor).unwrap(), 0), vec![3, 1, 2]);
}

#[test]
fn test_connection_strictly_mode_materialises_cursors() {
    let (provider, ctx) = setup_with(config(1));
    provider.on_query("ds_0", "t_user_0", &["id"], int_rows(&[4, 8]));
    provider.on_query("ds_0", "t_user_2", &["id"], int_rows(&[2, 6]));
    provider.on_query("ds_1", "t_user_1", &["id"], int_rows(&[1, 5]));
    provider.on_query("ds_1", "t_user_3", &["id"], int_rows(&[3, 7]));

    let query = QueryStatement::select("SELECT id FROM t_user ORDER BY id", &["t_user"])
        .with_projections(vec![Projection::column("id")])
        .with_order_by(vec![OrderByItem::asc("id")]);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let cursor = stmt.execute_query().unwrap();
    // Two units share one connection per shard, so shard cursors were
    // drained before the merge started.
    assert_eq!(provider.open_cursors(), 0);
    assert_eq!(provider.open_statements(), 4);
    let rows = collect_rows(cursor).unwrap();
    assert_eq!(ints(&rows, 0), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_binding_tables_join_pairs_by_shard() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0 o JOIN t_order_item_0", &["id"], int_rows(&[1]));
    provider.on_query("ds_1", "t_order_1 o JOIN t_order_item_1", &["id"], int_rows(&[2]));

    let query = QueryStatement::select(
        "SELECT o.id FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id",
        &["t_order", "t_order_item"],
    );
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));
    let rows = collect_rows(stmt.execute_query().unwrap()).unwrap();
    assert_eq!(ints(&rows, 0), vec![1, 2]);
    assert_eq!(stmt.routed_units().len(), 2);
}

#[test]
fn test_mismatched_shard_columns_fail_the_merge() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0", &["id"], int_rows(&[1]));
    provider.on_query("ds_1", "t_order_1", &["order_id"], int_rows(&[2]));

    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(QueryStatement::select(
        "SELECT * FROM t_order",
        &["t_order"],
    )));
    let err = stmt.execute_query().err().unwrap();
    assert!(matches!(err, ShardexError::Merge(_)));
    assert_eq!(provider.open_cursors(), 0);
    assert_eq!(provider.open_statements(), 0);
    assert_eq!(stmt.phase(), StatementPhase::Idle);
}

#[test]
fn test_grouped_pagination_applies_after_folding() {
    let (provider, ctx) = setup();
    let columns = ["status", "COUNT(*)"];
    let row = |status: &str, count: i64| vec![Datum::from(status), Datum::Int64(count)];
    provider.on_query("ds_0", "t_order_0", &columns, vec![row("new", 3), row("paid", 2)]);
    provider.on_query("ds_1", "t_order_1", &columns, vec![row("paid", 5), row("new", 1)]);

    let query = QueryStatement::select(
        "SELECT status, COUNT(*) FROM t_order GROUP BY status ORDER BY COUNT(*) DESC LIMIT 0, 1",
        &["t_order"],
    )
    .with_projections(vec![
        Projection::column("status"),
        Projection::aggregation(AggregationType::Count, "*", None),
    ])
    .with_group_by(vec![OrderByItem::asc("status")])
    .with_order_by(vec![OrderByItem::desc("COUNT(*)")])
    .with_pagination(0, 1);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let rows = collect_rows(stmt.execute_query().unwrap()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[0].as_str(), Some("paid"));
    assert_eq!(rows[0].values[1].as_i64(), Some(7));
    // Each shard returns all of its groups.
    assert!(provider
        .executed()
        .iter()
        .all(|e| e.sql.ends_with("ORDER BY COUNT(*) DESC")));
}

#[test]
fn test_limit_to_the_end_fans_out_without_a_shard_limit() {
    let (provider, ctx) = setup();
    provider.on_query("ds_0", "t_order_0", &["id"], int_rows(&[1, 3, 5, 7]));
    provider.on_query("ds_1", "t_order_1", &["id"], int_rows(&[2, 4, 6, 8]));

    let query = QueryStatement::select(
        "SELECT id FROM t_order ORDER BY id LIMIT 5, 18446744073709551615",
        &["t_order"],
    )
    .with_projections(vec![Projection::column("id")])
    .with_order_by(vec![OrderByItem::asc("id")])
    .with_pagination(5, u64::MAX);
    let mut stmt = ctx.prepare_statement(ParsedStatement::Query(query));

    let rows = collect_rows(stmt.execute_query().unwrap()).unwrap();
    assert_eq!(ints(&rows, 0), vec![6, 7, 8]);
    assert!(provider.executed().iter().all(|e| e.sql.ends_with("ORDER BY id")));
}
