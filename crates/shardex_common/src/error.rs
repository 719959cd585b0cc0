use std::fmt;

use thiserror::Error;

use crate::types::{ShardName, UnitIndex};

/// Convenience alias for `Result<T, ShardexError>`.
pub type ShardexResult<T> = Result<T, ShardexError>;

/// Error classification for escalation decisions.
///
/// - `UserError`:   bad statement, unroutable value, facade misuse
/// - `Transient`:   a shard call failed or timed out; the caller MAY retry the whole call
/// - `InternalBug`: should never happen (malformed shard result shapes, worker panics)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Transient,
    InternalBug,
}

/// Top-level error type for the routing / execution / merge core.
#[derive(Error, Debug)]
pub enum ShardexError {
    /// Unresolvable shard, missing table rule, unbound parameter or bad rewrite.
    /// Raised before any physical call is made.
    #[error("Routing error: {0}")]
    Routing(String),

    /// One or more route units failed; carries every failure.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Per-shard result shapes that cannot be merged.
    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The caller violated the logical statement state machine.
    #[error("State error: {0}")]
    State(String),

    /// Raised by a connection provider or physical statement.
    #[error("Connection error on {shard}: {message}")]
    Connection { shard: ShardName, message: String },

    #[error("Cancelled before dispatch")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    /// Internal bug: always carries a unique `error_code` and `debug_context`.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// One failed route unit.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: UnitIndex,
    pub shard: ShardName,
    pub sql: String,
    pub error: Box<ShardexError>,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.unit, self.shard, self.error)
    }
}

/// Aggregate of every unit-level failure of one logical call, in unit order.
#[derive(Debug)]
pub struct ExecutionError {
    failures: Vec<UnitFailure>,
    total_units: usize,
}

impl ExecutionError {
    pub fn new(mut failures: Vec<UnitFailure>, total_units: usize) -> Self {
        failures.sort_by_key(|f| f.unit);
        Self {
            failures,
            total_units,
        }
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<UnitFailure> {
        self.failures
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    /// Distinct failing shards, in unit order.
    pub fn failed_shards(&self) -> Vec<&ShardName> {
        let mut shards: Vec<&ShardName> = Vec::with_capacity(self.failures.len());
        for f in &self.failures {
            if !shards.contains(&&f.shard) {
                shards.push(&f.shard);
            }
        }
        shards
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} route units failed",
            self.failures.len(),
            self.total_units
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { ": " } else { "; " }, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

// ── ShardexError classification & helpers ────────────────────────────────────

impl ShardexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShardexError::Routing(_)
            | ShardexError::UnsupportedOperation(_)
            | ShardexError::State(_)
            | ShardexError::Config(_)
            | ShardexError::Cancelled => ErrorKind::UserError,
            ShardexError::Execution(_) | ShardexError::Connection { .. } => ErrorKind::Transient,
            ShardexError::Merge(_) | ShardexError::InternalBug { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    pub fn routing(msg: impl Into<String>) -> Self {
        ShardexError::Routing(msg.into())
    }

    pub fn merge(msg: impl Into<String>) -> Self {
        ShardexError::Merge(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        ShardexError::State(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        ShardexError::UnsupportedOperation(msg.into())
    }

    pub fn connection(shard: &ShardName, msg: impl Into<String>) -> Self {
        ShardexError::Connection {
            shard: shard.clone(),
            message: msg.into(),
        }
    }

    /// Construct an internal-bug error with a stable code for post-mortem.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        ShardexError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }

    /// The aggregated unit failures, when this is an execution error.
    pub fn unit_failures(&self) -> &[UnitFailure] {
        match self {
            ShardexError::Execution(e) => e.failures(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(unit: usize, shard: &str) -> UnitFailure {
        UnitFailure {
            unit: UnitIndex(unit),
            shard: ShardName::from(shard),
            sql: "UPDATE t SET a = ?".into(),
            error: Box::new(ShardexError::connection(&ShardName::from(shard), "timeout")),
        }
    }

    #[test]
    fn test_execution_error_orders_failures_by_unit() {
        let err = ExecutionError::new(vec![failure(2, "ds_1"), failure(0, "ds_0")], 3);
        let units: Vec<usize> = err.failures().iter().map(|f| f.unit.0).collect();
        assert_eq!(units, vec![0, 2]);
        assert_eq!(err.total_units(), 3);
    }

    #[test]
    fn test_execution_error_display_lists_every_failure() {
        let err = ExecutionError::new(vec![failure(0, "ds_0"), failure(1, "ds_1")], 2);
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 2 route units failed"));
        assert!(msg.contains("ds_0"));
        assert!(msg.contains("ds_1"));
    }

    #[test]
    fn test_failed_shards_deduplicated() {
        let err = ExecutionError::new(
            vec![failure(0, "ds_0"), failure(1, "ds_0"), failure(2, "ds_1")],
            4,
        );
        let shards: Vec<&str> = err.failed_shards().iter().map(|s| s.as_str()).collect();
        assert_eq!(shards, vec!["ds_0", "ds_1"]);
    }

    #[test]
    fn test_error_kind_classification() {
        assert!(ShardexError::routing("no rule").is_user_error());
        assert!(ShardexError::state("not executed").is_user_error());
        assert!(ShardexError::merge("column mismatch").is_internal_bug());
        let exec: ShardexError = ExecutionError::new(vec![failure(0, "ds_0")], 1).into();
        assert!(exec.is_transient());
        assert_eq!(exec.unit_failures().len(), 1);
    }
}
