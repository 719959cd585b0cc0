//! Routing: logical statement + parameters → physical route units.

pub mod engine;
pub mod rewrite;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use shardex_common::datum::Datum;
use shardex_common::types::ShardName;

use crate::parsed::ParsedStatement;

pub use engine::RoutingEngine;

/// One physical statement on one shard, with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteUnit {
    pub shard: ShardName,
    pub sql: String,
    pub parameters: Vec<Datum>,
}

impl fmt::Display for RouteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ::: {}", self.shard, self.sql)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
            write!(f, " ::: [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Keys of the generated column of an INSERT, one per input row in input
/// order. `generated` is false when the caller supplied the column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedKeyInfo {
    pub column: String,
    pub values: Vec<Datum>,
    pub generated: bool,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub statement: Arc<ParsedStatement>,
    pub units: Vec<RouteUnit>,
    pub generated_key: Option<GeneratedKeyInfo>,
}

impl RouteResult {
    pub fn is_single_unit(&self) -> bool {
        self.units.len() == 1
    }

    /// Distinct shards touched, in unit order.
    pub fn shards(&self) -> Vec<&ShardName> {
        let mut shards: Vec<&ShardName> = Vec::new();
        for u in &self.units {
            if !shards.contains(&&u.shard) {
                shards.push(&u.shard);
            }
        }
        shards
    }
}
