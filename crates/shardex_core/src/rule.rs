//! Sharding rules: logical table → data nodes, and sharding value → subset.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};
use shardex_common::types::ShardName;

use crate::keygen::KeyGenerator;

/// One physical table on one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub shard: ShardName,
    pub table: String,
}

impl DataNode {
    pub fn new(shard: &str, table: &str) -> Self {
        Self {
            shard: ShardName::from(shard),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.shard, self.table)
    }
}

/// Resolved value(s) of the sharding column.
#[derive(Debug, Clone)]
pub enum ShardingValue {
    List(Vec<Datum>),
    /// Inclusive bounds; `None` is unbounded.
    Range {
        lower: Option<Datum>,
        upper: Option<Datum>,
    },
}

pub trait ShardingRule: Send + Sync {
    /// Every data node of `logical_table`, in configuration order.
    fn data_nodes(&self, logical_table: &str) -> ShardexResult<Vec<DataNode>>;

    fn sharding_column(&self, logical_table: &str) -> Option<String>;

    /// Data nodes of `logical_table` that may hold rows matching `value`,
    /// in configuration order.
    fn route(&self, logical_table: &str, value: &ShardingValue) -> ShardexResult<Vec<DataNode>>;

    /// Broadcast tables are fully replicated on every shard.
    fn is_broadcast(&self, logical_table: &str) -> bool;

    /// True when all `tables` belong to one binding group (identical
    /// partitioning, so their data nodes pair up by position).
    fn is_binding(&self, tables: &[&str]) -> bool;

    fn key_generator(&self, logical_table: &str) -> Option<Arc<dyn KeyGenerator>>;

    /// Every configured shard, for statements that reference no table.
    fn shard_names(&self) -> Vec<ShardName>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardingAlgorithm {
    /// `value mod node_count` for integers; non-integers fall back to hashing.
    Modulo,
    /// FNV-1a of the value's text form, `mod node_count`.
    Hash,
}

#[derive(Debug, Clone)]
pub struct ShardingStrategy {
    pub column: String,
    pub algorithm: ShardingAlgorithm,
}

#[derive(Clone)]
pub struct TableRule {
    pub logical_table: String,
    pub data_nodes: Vec<DataNode>,
    pub strategy: Option<ShardingStrategy>,
    pub key_generator: Option<Arc<dyn KeyGenerator>>,
}

impl fmt::Debug for TableRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRule")
            .field("logical_table", &self.logical_table)
            .field("data_nodes", &self.data_nodes)
            .field("strategy", &self.strategy)
            .field(
                "key_generator",
                &self.key_generator.as_ref().map(|g| g.name()),
            )
            .finish()
    }
}

impl TableRule {
    pub fn new(logical_table: &str, data_nodes: Vec<DataNode>) -> Self {
        Self {
            logical_table: logical_table.to_string(),
            data_nodes,
            strategy: None,
            key_generator: None,
        }
    }

    pub fn sharded_by(mut self, column: &str, algorithm: ShardingAlgorithm) -> Self {
        self.strategy = Some(ShardingStrategy {
            column: column.to_string(),
            algorithm,
        });
        self
    }

    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = Some(generator);
        self
    }

    fn node_index(&self, value: &Datum, algorithm: ShardingAlgorithm) -> ShardexResult<usize> {
        if value.is_null() {
            return Err(ShardexError::routing(format!(
                "NULL sharding value for table '{}'",
                self.logical_table
            )));
        }
        let n = self.data_nodes.len() as u64;
        let slot = match (algorithm, value.as_i64()) {
            (ShardingAlgorithm::Modulo, Some(v)) => v.rem_euclid(n as i64) as u64,
            _ => fnv1a(value.to_string().as_bytes()) % n,
        };
        Ok(slot as usize)
    }

    fn route_value(&self, value: &ShardingValue) -> ShardexResult<Vec<DataNode>> {
        if self.data_nodes.is_empty() {
            return Err(ShardexError::routing(format!(
                "table '{}' has no data nodes",
                self.logical_table
            )));
        }
        let Some(strategy) = &self.strategy else {
            return Ok(self.data_nodes.clone());
        };
        let mut hit = vec![false; self.data_nodes.len()];
        match value {
            ShardingValue::List(values) => {
                for v in values {
                    hit[self.node_index(v, strategy.algorithm)?] = true;
                }
            }
            ShardingValue::Range { lower, upper } => {
                let lo = lower.as_ref().and_then(Datum::as_i64);
                let hi = upper.as_ref().and_then(Datum::as_i64);
                let bounds = match (lo, hi) {
                    (Some(lo), Some(hi)) if strategy.algorithm == ShardingAlgorithm::Modulo => {
                        Some((lo, hi))
                    }
                    _ => None,
                };
                let width = self.data_nodes.len() as u64;
                match bounds {
                    Some((lo, hi)) if hi < lo => {}
                    Some((lo, hi))
                        if hi.checked_sub(lo).is_some_and(|d| (d as u64) < width) =>
                    {
                        for v in lo..=hi {
                            hit[self.node_index(&Datum::Int64(v), strategy.algorithm)?] = true;
                        }
                    }
                    _ => hit.iter_mut().for_each(|h| *h = true),
                }
            }
        }
        Ok(self
            .data_nodes
            .iter()
            .zip(hit)
            .filter(|(_, h)| *h)
            .map(|(n, _)| n.clone())
            .collect())
    }
}

/// An in-memory rule set built up front.
#[derive(Debug, Default)]
pub struct StaticShardingRule {
    tables: HashMap<String, TableRule>,
    binding_groups: Vec<HashSet<String>>,
    broadcast: HashSet<String>,
    shards: Vec<ShardName>,
}

impl StaticShardingRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, rule: TableRule) -> Self {
        for node in &rule.data_nodes {
            if !self.shards.contains(&node.shard) {
                self.shards.push(node.shard.clone());
            }
        }
        self.tables.insert(rule.logical_table.to_ascii_lowercase(), rule);
        self
    }

    /// A table present with the same name on each of `shards`.
    pub fn with_broadcast_table(self, logical_table: &str, shards: &[&str]) -> Self {
        let nodes = shards.iter().map(|s| DataNode::new(s, logical_table)).collect();
        let mut this = self.with_table(TableRule::new(logical_table, nodes));
        this.broadcast.insert(logical_table.to_ascii_lowercase());
        this
    }

    pub fn with_binding_group(mut self, tables: &[&str]) -> Self {
        self.binding_groups
            .push(tables.iter().map(|t| t.to_ascii_lowercase()).collect());
        self
    }

    fn table(&self, logical_table: &str) -> ShardexResult<&TableRule> {
        self.tables
            .get(&logical_table.to_ascii_lowercase())
            .ok_or_else(|| {
                ShardexError::routing(format!("no sharding rule for table '{}'", logical_table))
            })
    }
}

impl ShardingRule for StaticShardingRule {
    fn data_nodes(&self, logical_table: &str) -> ShardexResult<Vec<DataNode>> {
        let rule = self.table(logical_table)?;
        if rule.data_nodes.is_empty() {
            return Err(ShardexError::routing(format!(
                "table '{}' has no data nodes",
                logical_table
            )));
        }
        Ok(rule.data_nodes.clone())
    }

    fn sharding_column(&self, logical_table: &str) -> Option<String> {
        self.table(logical_table)
            .ok()
            .and_then(|r| r.strategy.as_ref().map(|s| s.column.clone()))
    }

    fn route(&self, logical_table: &str, value: &ShardingValue) -> ShardexResult<Vec<DataNode>> {
        self.table(logical_table)?.route_value(value)
    }

    fn is_broadcast(&self, logical_table: &str) -> bool {
        self.broadcast.contains(&logical_table.to_ascii_lowercase())
    }

    fn is_binding(&self, tables: &[&str]) -> bool {
        self.binding_groups.iter().any(|group| {
            tables
                .iter()
                .all(|t| group.contains(&t.to_ascii_lowercase()))
        })
    }

    fn key_generator(&self, logical_table: &str) -> Option<Arc<dyn KeyGenerator>> {
        self.table(logical_table)
            .ok()
            .and_then(|r| r.key_generator.clone())
    }

    fn shard_names(&self) -> Vec<ShardName> {
        self.shards.clone()
    }
}

/// Build data nodes `shard.table_i` for `i` in `0..count`, spreading tables
/// round-robin over `shards`.
pub fn spread_nodes(table_prefix: &str, shards: &[&str], count: usize) -> Vec<DataNode> {
    (0..count)
        .map(|i| DataNode::new(shards[i % shards.len()], &format!("{}_{}", table_prefix, i)))
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
