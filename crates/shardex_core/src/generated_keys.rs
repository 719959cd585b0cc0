//! Reconcile generated keys of a logical INSERT into one key cursor.

use shardex_common::datum::{Datum, OwnedRow};
use shardex_common::error::{ShardexError, ShardexResult};

use crate::cursor::{MemoryCursor, ShardCursor};
use crate::parsed::ParsedStatement;
use crate::route::{GeneratedKeyInfo, RouteResult};

/// Column label for keys generated natively by a data source.
pub const NATIVE_KEY_COLUMN: &str = "GENERATED_KEY";

/// One-column cursor over generated keys.
#[derive(Debug, Clone, Default)]
pub struct GeneratedKeysCursor {
    inner: MemoryCursor,
}

impl GeneratedKeysCursor {
    pub fn new(column: &str, keys: Vec<Datum>) -> Self {
        Self {
            inner: MemoryCursor::new(
                vec![column.to_string()],
                keys.into_iter().map(|k| OwnedRow::new(vec![k])).collect(),
            ),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    /// Drain the remaining keys.
    pub fn keys(&mut self) -> Vec<Datum> {
        let mut keys = Vec::with_capacity(self.remaining());
        while let Ok(Some(mut row)) = self.inner.next_row() {
            if let Some(k) = row.values.pop() {
                keys.push(k);
            }
        }
        keys
    }
}

impl ShardCursor for GeneratedKeysCursor {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> ShardexResult<Option<OwnedRow>> {
        self.inner.next_row()
    }

    fn close(&mut self) -> ShardexResult<()> {
        self.inner.close()
    }
}

pub struct GeneratedKeyReconciler;

impl GeneratedKeyReconciler {
    /// `native_keys` holds the keys each route unit's data source reported,
    /// in unit order.
    pub fn reconcile(
        route: &RouteResult,
        native_keys: &[Vec<Datum>],
        return_generated_keys: bool,
    ) -> ShardexResult<GeneratedKeysCursor> {
        if let Some(info) = &route.generated_key {
            if info.generated || return_generated_keys {
                return Ok(GeneratedKeysCursor::new(&info.column, info.values.clone()));
            }
        }
        Self::native(
            route.statement.as_insert().is_some(),
            route.generated_key.is_some(),
            native_keys,
        )
    }

    /// Keys of a flushed batch: every call's key info in call order, or the
    /// native keys of a flush that ran as a single batch unit.
    pub fn reconcile_batch(
        statement: &ParsedStatement,
        infos: &[GeneratedKeyInfo],
        native_keys: &[Vec<Datum>],
        return_generated_keys: bool,
    ) -> ShardexResult<GeneratedKeysCursor> {
        if let Some(first) = infos.first() {
            if return_generated_keys || infos.iter().any(|i| i.generated) {
                return Ok(GeneratedKeysCursor::new(
                    &first.column,
                    infos.iter().flat_map(|i| i.values.iter().cloned()).collect(),
                ));
            }
        }
        Self::native(statement.as_insert().is_some(), !infos.is_empty(), native_keys)
    }

    /// Native keys are only ordered when one unit produced them. Key values
    /// known up front make a multi-unit INSERT unambiguous, so only an
    /// INSERT without them fails.
    fn native(
        is_insert: bool,
        keys_known: bool,
        native_keys: &[Vec<Datum>],
    ) -> ShardexResult<GeneratedKeysCursor> {
        match native_keys {
            [only] => Ok(GeneratedKeysCursor::new(NATIVE_KEY_COLUMN, only.clone())),
            [] => Ok(GeneratedKeysCursor::empty()),
            units if is_insert && !keys_known => Err(ShardexError::unsupported(format!(
                "native generated keys of an INSERT spanning {} route units cannot be ordered",
                units.len()
            ))),
            _ => Ok(GeneratedKeysCursor::empty()),
        }
    }
}
