//! Per-unit SQL rewriting: substitute positioned tokens of a `SqlTemplate`.

use shardex_common::error::{ShardexError, ShardexResult};

use crate::parsed::{DerivedColumn, Pagination, SqlTemplate, SqlToken};

/// What one route unit substitutes into the template.
pub struct RewriteContext<'a> {
    /// (logical table, actual table) pairs for this unit.
    pub tables: &'a [(String, String)],
    /// Appended to the select list; empty for single-unit routes.
    pub derived: &'a [DerivedColumn],
    pub pagination: PaginationRewrite,
}

/// What happens to the statement's pagination clause in one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationRewrite {
    /// Left as written.
    Keep,
    /// `LIMIT offset + row_count`. Dropped when the sum overflows, which is
    /// the "to the end" form `LIMIT n, 18446744073709551615`.
    Widen(Pagination),
    /// Removed: every shard returns all of its rows.
    Drop,
}

fn drop_clause(out: &mut String) {
    let kept = out.trim_end().len();
    out.truncate(kept);
}

pub fn rewrite(template: &SqlTemplate, ctx: &RewriteContext<'_>) -> ShardexResult<String> {
    let text = template.text.as_str();
    let mut out = String::with_capacity(text.len() + 32);
    let mut cursor = 0;

    for token in &template.tokens {
        let start = token.offset();
        let end = start + token.len();
        if start < cursor
            || end > text.len()
            || !text.is_char_boundary(start)
            || !text.is_char_boundary(end)
        {
            return Err(ShardexError::routing(format!(
                "malformed SQL template: token {:?} out of place in '{}'",
                token, text
            )));
        }
        out.push_str(&text[cursor..start]);
        match token {
            SqlToken::Table { logical, .. } => {
                let actual = ctx
                    .tables
                    .iter()
                    .find(|(l, _)| l.eq_ignore_ascii_case(logical))
                    .map(|(_, a)| a.as_str())
                    .ok_or_else(|| {
                        ShardexError::routing(format!(
                            "no actual table for '{}' in this route unit",
                            logical
                        ))
                    })?;
                out.push_str(actual);
            }
            SqlToken::DerivedItems { .. } => {
                for d in ctx.derived {
                    out.push_str(", ");
                    out.push_str(&d.expression);
                    out.push_str(" AS ");
                    out.push_str(&d.alias);
                }
            }
            SqlToken::Pagination { .. } => match ctx.pagination {
                PaginationRewrite::Keep => out.push_str(&text[start..end]),
                PaginationRewrite::Widen(p) => match p.offset.checked_add(p.row_count) {
                    Some(limit) => out.push_str(&format!("LIMIT {}", limit)),
                    None => drop_clause(&mut out),
                },
                PaginationRewrite::Drop => drop_clause(&mut out),
            },
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// `INSERT INTO actual (c1, c2) VALUES (..), (..)` from per-row value texts.
pub fn insert_sql(actual_table: &str, columns: &[String], rows: &[Vec<String>]) -> String {
    let values: Vec<String> = rows
        .iter()
        .map(|r| format!("({})", r.join(", ")))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        actual_table,
        columns.join(", "),
        values.join(", ")
    )
}
