use std::sync::Arc;

use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_common::types::ShardName;

use crate::keygen::KeyGenerator;
use crate::parsed::{
    ConditionOp, DerivedColumn, InsertStatement, ParsedStatement, QueryKind,
    ShardingCondition, SqlTemplate, ValueRef,
};
use crate::rule::{DataNode, ShardingRule, ShardingValue};

use super::rewrite::{self, PaginationRewrite, RewriteContext};
use super::{GeneratedKeyInfo, RouteResult, RouteUnit};

/// One shard plus the actual table chosen for every referenced logical table.
#[derive(Debug, Clone)]
struct RouteTarget {
    shard: ShardName,
    tables: Vec<(String, String)>,
}

/// Resolves statements to route units against a `ShardingRule`.
///
/// Routing is pure with respect to the data sources: no connection is
/// touched. The only side effect is drawing keys from a key generator when
/// an INSERT omits its generated column.
pub struct RoutingEngine {
    rule: Arc<dyn ShardingRule>,
    default_key_generator: Arc<dyn KeyGenerator>,
}

impl RoutingEngine {
    pub fn new(rule: Arc<dyn ShardingRule>, default_key_generator: Arc<dyn KeyGenerator>) -> Self {
        Self {
            rule,
            default_key_generator,
        }
    }

    pub fn route(
        &self,
        statement: &Arc<ParsedStatement>,
        params: &[Datum],
    ) -> ShardexResult<RouteResult> {
        let (units, generated_key) = match statement.as_ref() {
            ParsedStatement::Insert(insert) => self.route_insert(insert, params)?,
            ParsedStatement::Query(q) => {
                let unicast = q.tables.iter().all(|t| self.rule.is_broadcast(t));
                let targets = if q.tables.is_empty() {
                    self.tableless_targets(false)?
                } else {
                    self.route_tables(&q.tables, &q.conditions, params)?
                };
                let targets = if unicast {
                    targets.into_iter().take(1).collect()
                } else {
                    targets
                };
                let fan_out = targets.len() > 1;
                let derived = if fan_out && q.kind == QueryKind::Select {
                    q.shape.derived_columns()
                } else {
                    Vec::new()
                };
                // Shards of a grouped query return every partial group: a
                // per-shard limit would cut groups before they are folded.
                let pagination = match q.shape.pagination {
                    Some(_) if fan_out && q.kind == QueryKind::Select && q.shape.is_grouped() => {
                        PaginationRewrite::Drop
                    }
                    Some(p) if fan_out && q.kind == QueryKind::Select => PaginationRewrite::Widen(p),
                    _ => PaginationRewrite::Keep,
                };
                let units = self.render(&q.sql, &targets, &derived, pagination, params)?;
                (units, None)
            }
            ParsedStatement::Update(d) | ParsedStatement::Delete(d) => {
                let targets = self.route_tables(&d.tables, &d.conditions, params)?;
                (self.render(&d.sql, &targets, &[], PaginationRewrite::Keep, params)?, None)
            }
            ParsedStatement::Other(o) => {
                let targets = if o.tables.is_empty() {
                    self.tableless_targets(true)?
                } else {
                    self.route_tables(&o.tables, &[], params)?
                };
                (self.render(&o.sql, &targets, &[], PaginationRewrite::Keep, params)?, None)
            }
        };

        let mut deduped: Vec<RouteUnit> = Vec::with_capacity(units.len());
        for unit in units {
            if !deduped.contains(&unit) {
                deduped.push(unit);
            }
        }
        if deduped.is_empty() {
            return Err(ShardexError::routing(format!(
                "statement resolved to no data node: {}",
                statement.sql()
            )));
        }

        tracing::debug!(
            kind = statement.kind_label(),
            units = deduped.len(),
            "statement routed"
        );
        Ok(RouteResult {
            statement: statement.clone(),
            units: deduped,
            generated_key,
        })
    }

    fn tableless_targets(&self, all_shards: bool) -> ShardexResult<Vec<RouteTarget>> {
        let shards = self.rule.shard_names();
        if shards.is_empty() {
            return Err(ShardexError::routing("no shard configured"));
        }
        let take = if all_shards { shards.len() } else { 1 };
        Ok(shards
            .into_iter()
            .take(take)
            .map(|shard| RouteTarget {
                shard,
                tables: Vec::new(),
            })
            .collect())
    }

    /// Data nodes of one table that survive every sharding condition on it.
    fn nodes_for(
        &self,
        table: &str,
        conditions: &[ShardingCondition],
        params: &[Datum],
    ) -> ShardexResult<Vec<DataNode>> {
        let all = self.rule.data_nodes(table)?;
        if self.rule.is_broadcast(table) {
            return Ok(all);
        }
        let Some(column) = self.rule.sharding_column(table) else {
            return Ok(all);
        };
        let mut nodes = all;
        for cond in conditions.iter().filter(|c| {
            c.table.eq_ignore_ascii_case(table) && c.column.eq_ignore_ascii_case(&column)
        }) {
            let value = sharding_value(&cond.op, params)?;
            let hit = self.rule.route(table, &value)?;
            nodes.retain(|n| hit.contains(n));
        }
        if nodes.is_empty() {
            return Err(ShardexError::routing(format!(
                "sharding conditions on '{}.{}' match no data node",
                table, column
            )));
        }
        Ok(nodes)
    }

    fn route_tables(
        &self,
        tables: &[String],
        conditions: &[ShardingCondition],
        params: &[Datum],
    ) -> ShardexResult<Vec<RouteTarget>> {
        let per_table = tables
            .iter()
            .map(|t| Ok((t.as_str(), self.nodes_for(t, conditions, params)?)))
            .collect::<ShardexResult<Vec<(&str, Vec<DataNode>)>>>()?;

        let Some((first_table, first_nodes)) = per_table.first() else {
            return Err(ShardexError::routing("statement references no table"));
        };

        if per_table.len() == 1 {
            return Ok(first_nodes
                .iter()
                .map(|n| RouteTarget {
                    shard: n.shard.clone(),
                    tables: vec![(first_table.to_string(), n.table.clone())],
                })
                .collect());
        }

        let names: Vec<&str> = per_table.iter().map(|(t, _)| *t).collect();
        if self.rule.is_binding(&names) {
            self.binding_targets(&per_table)
        } else {
            self.cartesian_targets(&per_table)
        }
    }

    /// Binding tables pair by data-node position with the first table.
    fn binding_targets(
        &self,
        per_table: &[(&str, Vec<DataNode>)],
    ) -> ShardexResult<Vec<RouteTarget>> {
        let (primary, primary_nodes) = &per_table[0];
        let primary_all = self.rule.data_nodes(primary)?;
        let mut targets = Vec::new();
        for node in primary_nodes {
            let Some(pos) = primary_all.iter().position(|n| n == node) else {
                continue;
            };
            let mut tables = vec![(primary.to_string(), node.table.clone())];
            let mut complete = true;
            for (other, other_nodes) in &per_table[1..] {
                let other_all = self.rule.data_nodes(other)?;
                let paired = other_all.get(pos).ok_or_else(|| {
                    ShardexError::routing(format!(
                        "binding tables '{}' and '{}' have different node counts",
                        primary, other
                    ))
                })?;
                if paired.shard != node.shard {
                    return Err(ShardexError::routing(format!(
                        "binding tables '{}' and '{}' disagree on shard at position {}",
                        primary, other, pos
                    )));
                }
                if !other_nodes.contains(paired) {
                    complete = false;
                    break;
                }
                tables.push((other.to_string(), paired.table.clone()));
            }
            if complete {
                targets.push(RouteTarget {
                    shard: node.shard.clone(),
                    tables,
                });
            }
        }
        if targets.is_empty() {
            return Err(ShardexError::routing(
                "sharding conditions on binding tables match no common data node",
            ));
        }
        Ok(targets)
    }

    /// Unrelated tables: every combination of actual tables that share a shard.
    fn cartesian_targets(
        &self,
        per_table: &[(&str, Vec<DataNode>)],
    ) -> ShardexResult<Vec<RouteTarget>> {
        let mut shards: Vec<&ShardName> = Vec::new();
        for node in &per_table[0].1 {
            if !shards.contains(&&node.shard) {
                shards.push(&node.shard);
            }
        }
        let mut targets = Vec::new();
        for shard in shards {
            let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
            for (table, nodes) in per_table {
                let on_shard: Vec<&DataNode> = nodes.iter().filter(|n| &n.shard == shard).collect();
                let mut next = Vec::with_capacity(combos.len() * on_shard.len());
                for combo in &combos {
                    for node in &on_shard {
                        let mut c = combo.clone();
                        c.push((table.to_string(), node.table.clone()));
                        next.push(c);
                    }
                }
                combos = next;
            }
            targets.extend(combos.into_iter().map(|tables| RouteTarget {
                shard: shard.clone(),
                tables,
            }));
        }
        if targets.is_empty() {
            let names: Vec<&str> = per_table.iter().map(|(t, _)| *t).collect();
            return Err(ShardexError::routing(format!(
                "tables {:?} share no shard",
                names
            )));
        }
        Ok(targets)
    }

    fn render(
        &self,
        sql: &SqlTemplate,
        targets: &[RouteTarget],
        derived: &[DerivedColumn],
        pagination: PaginationRewrite,
        params: &[Datum],
    ) -> ShardexResult<Vec<RouteUnit>> {
        targets
            .iter()
            .map(|t| {
                let text = rewrite::rewrite(
                    sql,
                    &RewriteContext {
                        tables: &t.tables,
                        derived,
                        pagination,
                    },
                )?;
                Ok(RouteUnit {
                    shard: t.shard.clone(),
                    sql: text,
                    parameters: params.to_vec(),
                })
            })
            .collect()
    }

    fn route_insert(
        &self,
        insert: &InsertStatement,
        params: &[Datum],
    ) -> ShardexResult<(Vec<RouteUnit>, Option<GeneratedKeyInfo>)> {
        if insert.rows.is_empty() {
            return Err(ShardexError::routing(format!(
                "INSERT into '{}' has no rows",
                insert.table
            )));
        }
        if let Some(bad) = insert.rows.iter().position(|r| r.len() != insert.columns.len()) {
            return Err(ShardexError::routing(format!(
                "INSERT row {} has {} values for {} columns",
                bad,
                insert.rows[bad].len(),
                insert.columns.len()
            )));
        }

        let key_info = self.generated_keys(insert, params)?;
        let appended_key = key_info.as_ref().filter(|k| k.generated);

        let mut columns = insert.columns.clone();
        if let Some(k) = appended_key {
            columns.push(k.column.clone());
        }

        let all_nodes = self.rule.data_nodes(&insert.table)?;
        let broadcast = self.rule.is_broadcast(&insert.table);
        let shard_col = self
            .rule
            .sharding_column(&insert.table)
            .and_then(|c| columns.iter().position(|x| x.eq_ignore_ascii_case(&c)));

        // (node, rows) in first-appearance order.
        let mut groups: Vec<(DataNode, Vec<usize>)> = Vec::new();
        for (row_idx, row) in insert.rows.iter().enumerate() {
            let nodes = if broadcast {
                all_nodes.clone()
            } else if let Some(pos) = shard_col {
                let value = match (pos < row.len(), appended_key) {
                    (true, _) => row[pos].resolve(params)?,
                    (false, Some(k)) => k.values[row_idx].clone(),
                    (false, None) => {
                        return Err(ShardexError::internal_bug(
                            "ROUTE_INSERT_COLUMN",
                            "sharding column position beyond row",
                            format!("table={} pos={}", insert.table, pos),
                        ))
                    }
                };
                let nodes = self
                    .rule
                    .route(&insert.table, &ShardingValue::List(vec![value]))?;
                if nodes.len() != 1 {
                    return Err(ShardexError::routing(format!(
                        "INSERT row {} of '{}' resolves to {} data nodes",
                        row_idx,
                        insert.table,
                        nodes.len()
                    )));
                }
                nodes
            } else if all_nodes.len() == 1 {
                all_nodes.clone()
            } else {
                return Err(ShardexError::routing(format!(
                    "INSERT into sharded table '{}' must supply its sharding column",
                    insert.table
                )));
            };
            for node in nodes {
                match groups.iter_mut().find(|(n, _)| *n == node) {
                    Some((_, rows)) => rows.push(row_idx),
                    None => groups.push((node, vec![row_idx])),
                }
            }
        }

        let mut units = Vec::with_capacity(groups.len());
        for (node, rows) in groups {
            let mut values_text = Vec::with_capacity(rows.len());
            let mut bound = Vec::new();
            for row_idx in rows {
                let mut texts = Vec::with_capacity(columns.len());
                for value in &insert.rows[row_idx] {
                    match value {
                        ValueRef::Param(_) => {
                            texts.push("?".to_string());
                            bound.push(value.resolve(params)?);
                        }
                        ValueRef::Literal(d) => texts.push(d.to_sql_literal()),
                    }
                }
                if let Some(k) = appended_key {
                    texts.push("?".to_string());
                    bound.push(k.values[row_idx].clone());
                }
                values_text.push(texts);
            }
            units.push(RouteUnit {
                shard: node.shard.clone(),
                sql: rewrite::insert_sql(&node.table, &columns, &values_text),
                parameters: bound,
            });
        }
        Ok((units, key_info))
    }

    fn generated_keys(
        &self,
        insert: &InsertStatement,
        params: &[Datum],
    ) -> ShardexResult<Option<GeneratedKeyInfo>> {
        let Some(column) = &insert.generated_key_column else {
            return Ok(None);
        };
        if let Some(pos) = insert.column_position(column) {
            let values = insert
                .rows
                .iter()
                .map(|r| r[pos].resolve(params))
                .collect::<ShardexResult<Vec<Datum>>>()?;
            return Ok(Some(GeneratedKeyInfo {
                column: column.clone(),
                values,
                generated: false,
            }));
        }
        let generator = self
            .rule
            .key_generator(&insert.table)
            .unwrap_or_else(|| self.default_key_generator.clone());
        let values = (0..insert.rows.len())
            .map(|_| generator.generate_key())
            .collect::<ShardexResult<Vec<Datum>>>()?;
        Ok(Some(GeneratedKeyInfo {
            column: column.clone(),
            values,
            generated: true,
        }))
    }
}

fn sharding_value(op: &ConditionOp, params: &[Datum]) -> ShardexResult<ShardingValue> {
    Ok(match op {
        ConditionOp::Equal(v) => ShardingValue::List(vec![v.resolve(params)?]),
        ConditionOp::In(vs) => ShardingValue::List(
            vs.iter()
                .map(|v| v.resolve(params))
                .collect::<ShardexResult<_>>()?,
        ),
        ConditionOp::Range { lower, upper } => ShardingValue::Range {
            lower: lower.as_ref().map(|v| v.resolve(params)).transpose()?,
            upper: upper.as_ref().map(|v| v.resolve(params)).transpose()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::IncrementKeyGenerator;
    use crate::parsed::{
        AggregationType, DmlStatement, OrderByItem, OtherStatement, Projection, QueryStatement,
    };
    use crate::rule::{spread_nodes, ShardingAlgorithm, StaticShardingRule, TableRule};

    fn engine() -> RoutingEngine {
        let rule = StaticShardingRule::new()
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
            .with_broadcast_table("t_config", &["ds_0", "ds_1"]);
        RoutingEngine::new(
            Arc::new(rule),
            Arc::new(IncrementKeyGenerator::starting_at(101)),
        )
    }

    fn route(stmt: ParsedStatement, params: &[Datum]) -> ShardexResult<RouteResult> {
        engine().route(&Arc::new(stmt), params)
    }

    fn sqls(r: &RouteResult) -> Vec<String> {
        r.units.iter().map(|u| format!("{}|{}", u.shard, u.sql)).collect()
    }

    #[test]
    fn test_equality_routes_to_single_unit() {
        let q = QueryStatement::select("SELECT * FROM t_order WHERE user_id = ?", &["t_order"])
            .with_condition(ShardingCondition::equal("t_order", "user_id", ValueRef::Param(0)));
        let r = route(ParsedStatement::Query(q), &[Datum::Int64(3)]).unwrap();
        assert_eq!(sqls(&r), vec!["ds_1|SELECT * FROM t_order_1 WHERE user_id = ?"]);
        assert_eq!(r.units[0].parameters, vec![Datum::Int64(3)]);
    }

    #[test]
    fn test_missing_condition_broadcasts_with_derived_columns() {
        let q = QueryStatement::select("SELECT id FROM t_order ORDER BY ts", &["t_order"])
            .with_projections(vec![Projection::column("id")])
            .with_order_by(vec![OrderByItem::asc("ts")]);
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(
            sqls(&r),
            vec![
                "ds_0|SELECT id, ts AS ORDER_BY_DERIVED_0 FROM t_order_0 ORDER BY ts",
                "ds_1|SELECT id, ts AS ORDER_BY_DERIVED_0 FROM t_order_1 ORDER BY ts",
            ]
        );
    }

    #[test]
    fn test_single_unit_keeps_avg_and_limit_untouched() {
        let q = QueryStatement::select(
            "SELECT AVG(amount) FROM t_order WHERE user_id = 2 LIMIT 5, 5",
            &["t_order"],
        )
        .with_condition(ShardingCondition::equal(
            "t_order",
            "user_id",
            ValueRef::Literal(Datum::Int64(2)),
        ))
        .with_projections(vec![Projection::aggregation(AggregationType::Avg, "amount", None)])
        .with_pagination(5, 5);
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(
            sqls(&r),
            vec!["ds_0|SELECT AVG(amount) FROM t_order_0 WHERE user_id = 2 LIMIT 5, 5"]
        );
    }

    #[test]
    fn test_fan_out_widens_limit() {
        let q = QueryStatement::select("SELECT id FROM t_order LIMIT 5, 5", &["t_order"])
            .with_projections(vec![Projection::column("id")])
            .with_pagination(5, 5);
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert!(r.units.iter().all(|u| u.sql.ends_with("LIMIT 10")));
    }

    #[test]
    fn test_grouped_fan_out_drops_limit() {
        let q = QueryStatement::select(
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
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(r.units.len(), 2);
        assert!(r
            .units
            .iter()
            .all(|u| u.sql.ends_with("ORDER BY COUNT(*) DESC") && !u.sql.contains("LIMIT")));
    }

    #[test]
    fn test_conditions_intersect() {
        let q = QueryStatement::select("SELECT * FROM t_user", &["t_user"])
            .with_condition(ShardingCondition::in_list(
                "t_user",
                "id",
                vec![ValueRef::Literal(Datum::Int64(1)), ValueRef::Literal(Datum::Int64(2))],
            ))
            .with_condition(ShardingCondition::equal(
                "t_user",
                "id",
                ValueRef::Literal(Datum::Int64(5)),
            ));
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(sqls(&r), vec!["ds_1|SELECT * FROM t_user_1"]);

        let q = QueryStatement::select("SELECT * FROM t_user", &["t_user"])
            .with_condition(ShardingCondition::equal(
                "t_user",
                "id",
                ValueRef::Literal(Datum::Int64(1)),
            ))
            .with_condition(ShardingCondition::equal(
                "t_user",
                "id",
                ValueRef::Literal(Datum::Int64(2)),
            ));
        assert!(matches!(
            route(ParsedStatement::Query(q), &[]),
            Err(ShardexError::Routing(_))
        ));
    }

    #[test]
    fn test_binding_tables_pair_by_position() {
        let q = QueryStatement::select(
            "SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id",
            &["t_order", "t_order_item"],
        );
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(
            sqls(&r),
            vec![
                "ds_0|SELECT * FROM t_order_0 o JOIN t_order_item_0 i ON o.order_id = i.order_id",
                "ds_1|SELECT * FROM t_order_1 o JOIN t_order_item_1 i ON o.order_id = i.order_id",
            ]
        );
    }

    #[test]
    fn test_unbound_tables_take_cartesian_product_per_shard() {
        let q = QueryStatement::select(
            "SELECT * FROM t_order JOIN t_user ON 1 = 1",
            &["t_order", "t_user"],
        );
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(
            sqls(&r),
            vec![
                "ds_0|SELECT * FROM t_order_0 JOIN t_user_0 ON 1 = 1",
                "ds_0|SELECT * FROM t_order_0 JOIN t_user_2 ON 1 = 1",
                "ds_1|SELECT * FROM t_order_1 JOIN t_user_1 ON 1 = 1",
                "ds_1|SELECT * FROM t_order_1 JOIN t_user_3 ON 1 = 1",
            ]
        );
    }

    #[test]
    fn test_broadcast_query_is_unicast_and_update_hits_all() {
        let q = QueryStatement::select("SELECT * FROM t_config", &["t_config"]);
        let r = route(ParsedStatement::Query(q), &[]).unwrap();
        assert_eq!(sqls(&r), vec!["ds_0|SELECT * FROM t_config"]);

        let u = DmlStatement::new("UPDATE t_config SET v = ?", &["t_config"]);
        let r = route(ParsedStatement::Update(u), &[Datum::Int64(1)]).unwrap();
        assert_eq!(r.units.len(), 2);
    }

    #[test]
    fn test_tableless_statements() {
        let q = QueryStatement::select("SELECT 1", &[]);
        assert_eq!(route(ParsedStatement::Query(q), &[]).unwrap().units.len(), 1);
        let o = OtherStatement::new("SET autocommit = 1", &[]);
        assert_eq!(route(ParsedStatement::Other(o), &[]).unwrap().units.len(), 2);
    }

    #[test]
    fn test_unknown_table_fails_before_execution() {
        let q = QueryStatement::select("SELECT * FROM t_missing", &["t_missing"]);
        let err = route(ParsedStatement::Query(q), &[]).unwrap_err();
        assert!(matches!(err, ShardexError::Routing(_)));
    }

    #[test]
    fn test_insert_generates_keys_in_row_order() {
        let insert = InsertStatement::new(
            "INSERT INTO t_order (user_id, status) VALUES (?, ?), (?, ?), (?, ?)",
            "t_order",
            &["user_id", "status"],
            vec![
                vec![ValueRef::Param(0), ValueRef::Param(1)],
                vec![ValueRef::Param(2), ValueRef::Param(3)],
                vec![ValueRef::Param(4), ValueRef::Param(5)],
            ],
        )
        .with_generated_key("order_id");
        let params: Vec<Datum> = vec![
            Datum::Int64(1),
            "a".into(),
            Datum::Int64(2),
            "b".into(),
            Datum::Int64(3),
            "c".into(),
        ];
        let r = route(ParsedStatement::Insert(insert), &params).unwrap();
        let keys = r.generated_key.as_ref().unwrap();
        assert!(keys.generated);
        assert_eq!(
            keys.values,
            vec![Datum::Int64(101), Datum::Int64(102), Datum::Int64(103)]
        );
        assert_eq!(
            sqls(&r),
            vec![
                "ds_1|INSERT INTO t_order_1 (user_id, status, order_id) VALUES (?, ?, ?), (?, ?, ?)",
                "ds_0|INSERT INTO t_order_0 (user_id, status, order_id) VALUES (?, ?, ?)",
            ]
        );
        assert_eq!(
            r.units[0].parameters,
            vec![
                Datum::Int64(1),
                "a".into(),
                Datum::Int64(101),
                Datum::Int64(3),
                "c".into(),
                Datum::Int64(103),
            ]
        );
    }

    #[test]
    fn test_insert_with_explicit_key_is_not_generated() {
        let insert = InsertStatement::new(
            "INSERT INTO t_order (user_id, order_id) VALUES (4, ?)",
            "t_order",
            &["user_id", "order_id"],
            vec![vec![ValueRef::Literal(Datum::Int64(4)), ValueRef::Param(0)]],
        )
        .with_generated_key("order_id");
        let r = route(ParsedStatement::Insert(insert), &[Datum::Int64(900)]).unwrap();
        let keys = r.generated_key.as_ref().unwrap();
        assert!(!keys.generated);
        assert_eq!(keys.values, vec![Datum::Int64(900)]);
        assert_eq!(
            sqls(&r),
            vec!["ds_0|INSERT INTO t_order_0 (user_id, order_id) VALUES (4, ?)"]
        );
    }

    #[test]
    fn test_insert_without_sharding_column_rejected() {
        let insert = InsertStatement::new(
            "INSERT INTO t_order (status) VALUES ('x')",
            "t_order",
            &["status"],
            vec![vec![ValueRef::Literal("x".into())]],
        );
        assert!(matches!(
            route(ParsedStatement::Insert(insert), &[]),
            Err(ShardexError::Routing(_))
        ));
    }
}
