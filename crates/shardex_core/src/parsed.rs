//! Parsed statement model.
//!
//! The SQL parser lives outside this crate; what it hands over is the closed
//! `ParsedStatement` enum below: referenced logical tables, sharding
//! conditions, the query shape needed for merging, and a `SqlTemplate` whose
//! positioned tokens the rewriter substitutes per data node.

use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};

/// Where a value comes from: a positional parameter or an inline literal.
#[derive(Debug, Clone)]
pub enum ValueRef {
    Param(usize),
    Literal(Datum),
}

impl ValueRef {
    pub fn resolve(&self, params: &[Datum]) -> ShardexResult<Datum> {
        match self {
            ValueRef::Literal(d) => Ok(d.clone()),
            ValueRef::Param(idx) => params.get(*idx).cloned().ok_or_else(|| {
                ShardexError::routing(format!(
                    "parameter {} is not bound ({} bound)",
                    idx,
                    params.len()
                ))
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConditionOp {
    Equal(ValueRef),
    In(Vec<ValueRef>),
    /// Inclusive bounds; `None` is unbounded.
    Range {
        lower: Option<ValueRef>,
        upper: Option<ValueRef>,
    },
}

/// A predicate on one column of one logical table, as extracted from WHERE.
#[derive(Debug, Clone)]
pub struct ShardingCondition {
    pub table: String,
    pub column: String,
    pub op: ConditionOp,
}

impl ShardingCondition {
    pub fn equal(table: &str, column: &str, value: ValueRef) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            op: ConditionOp::Equal(value),
        }
    }

    pub fn in_list(table: &str, column: &str, values: Vec<ValueRef>) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            op: ConditionOp::In(values),
        }
    }

    pub fn range(
        table: &str,
        column: &str,
        lower: Option<ValueRef>,
        upper: Option<ValueRef>,
    ) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            op: ConditionOp::Range { lower, upper },
        }
    }
}

/// A substitution point inside `SqlTemplate::text` (byte offsets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlToken {
    /// A logical table name to replace with the data node's actual table.
    Table {
        offset: usize,
        len: usize,
        logical: String,
    },
    /// End of the select list, where derived merge columns are appended.
    DerivedItems { offset: usize },
    /// The pagination clause, rewritten when a query fans out.
    Pagination { offset: usize, len: usize },
}

impl SqlToken {
    pub fn offset(&self) -> usize {
        match self {
            SqlToken::Table { offset, .. }
            | SqlToken::DerivedItems { offset }
            | SqlToken::Pagination { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SqlToken::Table { len, .. } | SqlToken::Pagination { len, .. } => *len,
            SqlToken::DerivedItems { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SqlTemplate {
    pub text: String,
    pub tokens: Vec<SqlToken>,
}

impl SqlTemplate {
    pub fn new(text: impl Into<String>, tokens: Vec<SqlToken>) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }

    /// Locate tokens in `text` for the given logical tables: whole-word,
    /// case-insensitive table occurrences, the end of a SELECT list (before
    /// the first ` FROM `) and a trailing ` LIMIT ...` clause.
    pub fn scan(text: &str, tables: &[&str]) -> Self {
        let lower = text.to_ascii_lowercase();
        let bytes = lower.as_bytes();
        let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
        let mut tokens = Vec::new();

        for table in tables {
            let needle = table.to_ascii_lowercase();
            let mut from = 0;
            while let Some(pos) = lower[from..].find(&needle) {
                let start = from + pos;
                let end = start + needle.len();
                let left_ok = start == 0 || !is_word(bytes[start - 1]);
                let right_ok = end == bytes.len() || !is_word(bytes[end]);
                if left_ok && right_ok {
                    tokens.push(SqlToken::Table {
                        offset: start,
                        len: needle.len(),
                        logical: table.to_string(),
                    });
                }
                from = end;
            }
        }

        if lower.trim_start().starts_with("select") {
            if let Some(pos) = lower.find(" from ") {
                tokens.push(SqlToken::DerivedItems { offset: pos });
            }
        }
        if let Some(pos) = lower.rfind(" limit ") {
            tokens.push(SqlToken::Pagination {
                offset: pos + 1,
                len: text.len() - pos - 1,
            });
        }

        tokens.sort_by_key(|t| t.offset());
        Self {
            text: text.to_string(),
            tokens,
        }
    }
}

// ── Query shape ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    /// Data administration statements (SHOW ..., DESCRIBE ...).
    Dal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Count,
    Sum,
    Max,
    Min,
    Avg,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Max => "MAX",
            AggregationType::Min => "MIN",
            AggregationType::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Projection {
    Column {
        expr: String,
        alias: Option<String>,
    },
    Aggregation {
        func: AggregationType,
        arg: String,
        alias: Option<String>,
    },
}

impl Projection {
    pub fn column(expr: &str) -> Self {
        Projection::Column {
            expr: expr.to_string(),
            alias: None,
        }
    }

    pub fn aggregation(func: AggregationType, arg: &str, alias: Option<&str>) -> Self {
        Projection::Aggregation {
            func,
            arg: arg.to_string(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn expression(&self) -> String {
        match self {
            Projection::Column { expr, .. } => expr.clone(),
            Projection::Aggregation { func, arg, .. } => format!("{}({})", func.as_str(), arg),
        }
    }

    /// The column label a shard reports for this projection.
    pub fn label(&self) -> String {
        match self {
            Projection::Column { alias: Some(a), .. }
            | Projection::Aggregation { alias: Some(a), .. } => a.clone(),
            _ => self.expression(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.label().eq_ignore_ascii_case(name) || self.expression().eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub column: String,
    pub direction: Direction,
    pub nulls: NullOrdering,
}

impl OrderByItem {
    /// Ascending with NULLs sorting low.
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Asc,
            nulls: NullOrdering::First,
        }
    }

    /// Descending with NULLs sorting low (so last).
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Desc,
            nulls: NullOrdering::Last,
        }
    }

    pub fn nulls(mut self, nulls: NullOrdering) -> Self {
        self.nulls = nulls;
        self
    }
}

/// Literal `LIMIT offset, row_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub row_count: u64,
}

/// A column a fanned-out query must additionally select so the merge can
/// see sort keys and AVG components. Hidden from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumn {
    pub expression: String,
    pub alias: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryShape {
    pub projections: Vec<Projection>,
    pub order_by: Vec<OrderByItem>,
    pub group_by: Vec<OrderByItem>,
    pub pagination: Option<Pagination>,
}

impl QueryShape {
    pub fn has_aggregation(&self) -> bool {
        self.projections
            .iter()
            .any(|p| matches!(p, Projection::Aggregation { .. }))
    }

    /// GROUP BY or any aggregate function: needs a materialising merge.
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || self.has_aggregation()
    }

    pub fn visible_width(&self) -> usize {
        self.projections.len()
    }

    pub fn visible_labels(&self) -> Vec<String> {
        self.projections.iter().map(Projection::label).collect()
    }

    fn projection_for(&self, name: &str) -> Option<&Projection> {
        self.projections.iter().find(|p| p.matches(name))
    }

    /// Columns appended to the select list of every fanned-out unit.
    pub fn derived_columns(&self) -> Vec<DerivedColumn> {
        let mut derived: Vec<DerivedColumn> = Vec::new();
        let push_unique = |derived: &mut Vec<DerivedColumn>, expr: &str, alias: String| {
            if !derived.iter().any(|d| d.expression.eq_ignore_ascii_case(expr)) {
                derived.push(DerivedColumn {
                    expression: expr.to_string(),
                    alias,
                });
            }
        };
        // `SELECT *` already carries every sort column.
        let star = self.projections.is_empty();
        for (i, item) in self.group_by.iter().enumerate() {
            if !star && self.projection_for(&item.column).is_none() {
                push_unique(&mut derived, &item.column, format!("GROUP_BY_DERIVED_{}", i));
            }
        }
        for (i, item) in self.order_by.iter().enumerate() {
            if !star && self.projection_for(&item.column).is_none() {
                push_unique(&mut derived, &item.column, format!("ORDER_BY_DERIVED_{}", i));
            }
        }
        for (i, p) in self.projections.iter().enumerate() {
            if let Projection::Aggregation {
                func: AggregationType::Avg,
                arg,
                ..
            } = p
            {
                derived.push(DerivedColumn {
                    expression: format!("COUNT({})", arg),
                    alias: avg_count_label(i),
                });
                derived.push(DerivedColumn {
                    expression: format!("SUM({})", arg),
                    alias: avg_sum_label(i),
                });
            }
        }
        derived
    }

    /// Label under which `column` appears in a fanned-out shard cursor.
    pub fn resolve_label(&self, column: &str) -> String {
        if let Some(p) = self.projection_for(column) {
            return p.label();
        }
        self.derived_columns()
            .into_iter()
            .find(|d| d.expression.eq_ignore_ascii_case(column))
            .map(|d| d.alias)
            .unwrap_or_else(|| column.to_string())
    }
}

pub fn avg_count_label(projection_idx: usize) -> String {
    format!("AVG_DERIVED_COUNT_{}", projection_idx)
}

pub fn avg_sum_label(projection_idx: usize) -> String {
    format!("AVG_DERIVED_SUM_{}", projection_idx)
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueryStatement {
    pub kind: QueryKind,
    pub sql: SqlTemplate,
    pub tables: Vec<String>,
    pub conditions: Vec<ShardingCondition>,
    pub shape: QueryShape,
}

impl QueryStatement {
    /// A SELECT whose tokens are located with `SqlTemplate::scan`.
    pub fn select(text: &str, tables: &[&str]) -> Self {
        Self {
            kind: QueryKind::Select,
            sql: SqlTemplate::scan(text, tables),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            conditions: Vec::new(),
            shape: QueryShape::default(),
        }
    }

    pub fn dal(text: &str, tables: &[&str]) -> Self {
        Self {
            kind: QueryKind::Dal,
            ..Self::select(text, tables)
        }
    }

    pub fn with_condition(mut self, condition: ShardingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_projections(mut self, projections: Vec<Projection>) -> Self {
        self.shape.projections = projections;
        self
    }

    pub fn with_order_by(mut self, items: Vec<OrderByItem>) -> Self {
        self.shape.order_by = items;
        self
    }

    pub fn with_group_by(mut self, items: Vec<OrderByItem>) -> Self {
        self.shape.group_by = items;
        self
    }

    pub fn with_pagination(mut self, offset: u64, row_count: u64) -> Self {
        self.shape.pagination = Some(Pagination { offset, row_count });
        self
    }
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    /// Original statement text, for SQL logging.
    pub sql: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ValueRef>>,
    pub generated_key_column: Option<String>,
}

impl InsertStatement {
    pub fn new(sql: &str, table: &str, columns: &[&str], rows: Vec<Vec<ValueRef>>) -> Self {
        Self {
            sql: sql.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            generated_key_column: None,
        }
    }

    pub fn with_generated_key(mut self, column: &str) -> Self {
        self.generated_key_column = Some(column.to_string());
        self
    }

    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }
}

/// UPDATE / DELETE.
#[derive(Debug, Clone)]
pub struct DmlStatement {
    pub sql: SqlTemplate,
    pub tables: Vec<String>,
    pub conditions: Vec<ShardingCondition>,
}

impl DmlStatement {
    pub fn new(text: &str, tables: &[&str]) -> Self {
        Self {
            sql: SqlTemplate::scan(text, tables),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: ShardingCondition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// DDL, session and anything else routed by table only.
#[derive(Debug, Clone)]
pub struct OtherStatement {
    pub sql: SqlTemplate,
    pub tables: Vec<String>,
}

impl OtherStatement {
    pub fn new(text: &str, tables: &[&str]) -> Self {
        Self {
            sql: SqlTemplate::scan(text, tables),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParsedStatement {
    Query(QueryStatement),
    Insert(InsertStatement),
    Update(DmlStatement),
    Delete(DmlStatement),
    Other(OtherStatement),
}

impl ParsedStatement {
    pub fn tables(&self) -> Vec<&str> {
        match self {
            ParsedStatement::Query(q) => q.tables.iter().map(String::as_str).collect(),
            ParsedStatement::Insert(i) => vec![i.table.as_str()],
            ParsedStatement::Update(d) | ParsedStatement::Delete(d) => {
                d.tables.iter().map(String::as_str).collect()
            }
            ParsedStatement::Other(o) => o.tables.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, ParsedStatement::Query(_))
    }

    pub fn is_select(&self) -> bool {
        matches!(self, ParsedStatement::Query(q) if q.kind == QueryKind::Select)
    }

    pub fn as_insert(&self) -> Option<&InsertStatement> {
        match self {
            ParsedStatement::Insert(i) => Some(i),
            _ => None,
        }
    }

    pub fn shape(&self) -> Option<&QueryShape> {
        match self {
            ParsedStatement::Query(q) => Some(&q.shape),
            _ => None,
        }
    }

    /// Logical SQL text, for logging.
    pub fn sql(&self) -> &str {
        match self {
            ParsedStatement::Query(q) => &q.sql.text,
            ParsedStatement::Insert(i) => &i.sql,
            ParsedStatement::Update(d) | ParsedStatement::Delete(d) => &d.sql.text,
            ParsedStatement::Other(o) => &o.sql.text,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ParsedStatement::Query(q) if q.kind == QueryKind::Select => "select",
            ParsedStatement::Query(_) => "dal",
            ParsedStatement::Insert(_) => "insert",
            ParsedStatement::Update(_) => "update",
            ParsedStatement::Delete(_) => "delete",
            ParsedStatement::Other(_) => "other",
        }
    }
}
