use std::sync::Arc;

use shardex_common::config::ShardexConfig;
use shardex_common::error::ShardexResult;

use crate::connection::ConnectionProvider;
use crate::keygen::{KeyGenerator, SnowflakeKeyGenerator};
use crate::parsed::ParsedStatement;
use crate::route::RoutingEngine;
use crate::rule::ShardingRule;
use crate::statement::LogicalStatement;

/// Everything logical statements share: the sharding rule, the data
/// sources and the configuration.
pub struct ShardingContext {
    rule: Arc<dyn ShardingRule>,
    provider: Arc<dyn ConnectionProvider>,
    router: Arc<RoutingEngine>,
    config: ShardexConfig,
}

impl ShardingContext {
    /// Validates `config` and uses a snowflake generator built from it for
    /// tables without their own key generator.
    pub fn new(
        rule: Arc<dyn ShardingRule>,
        provider: Arc<dyn ConnectionProvider>,
        config: ShardexConfig,
    ) -> ShardexResult<Self> {
        config.validate()?;
        let generator = Arc::new(SnowflakeKeyGenerator::new(&config.keygen)?);
        Self::with_key_generator(rule, provider, config, generator)
    }

    pub fn with_key_generator(
        rule: Arc<dyn ShardingRule>,
        provider: Arc<dyn ConnectionProvider>,
        config: ShardexConfig,
        default_key_generator: Arc<dyn KeyGenerator>,
    ) -> ShardexResult<Self> {
        config.validate()?;
        tracing::debug!(
            shards = rule.shard_names().len(),
            executor_size = config.executor.executor_size,
            max_connections_per_query = config.executor.max_connections_per_query,
            key_generator = default_key_generator.name(),
            "sharding context ready"
        );
        Ok(Self {
            router: Arc::new(RoutingEngine::new(rule.clone(), default_key_generator)),
            rule,
            provider,
            config,
        })
    }

    pub fn prepare_statement(&self, statement: ParsedStatement) -> LogicalStatement {
        self.build(statement, false)
    }

    /// Like `prepare_statement`, but `generated_keys` prefers the keys the
    /// router generated over what the data sources report.
    pub fn prepare_statement_returning_keys(&self, statement: ParsedStatement) -> LogicalStatement {
        self.build(statement, true)
    }

    fn build(&self, statement: ParsedStatement, return_generated_keys: bool) -> LogicalStatement {
        let tables = statement.tables();
        let all_broadcast = !tables.is_empty() && tables.iter().all(|t| self.rule.is_broadcast(t));
        LogicalStatement::new(
            statement,
            self.router.clone(),
            self.provider.clone(),
            &self.config,
            !all_broadcast,
            return_generated_keys,
        )
    }

    pub fn config(&self) -> &ShardexConfig {
        &self.config
    }

    pub fn rule(&self) -> &Arc<dyn ShardingRule> {
        &self.rule
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }
}
