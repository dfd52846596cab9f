//! Configuration validation

use std::collections::HashSet;

use shardbridge_core::{Result, ShardBridgeError};

use crate::{RuleRecord, ShardBridgeConfig};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration
    pub fn validate(config: &ShardBridgeConfig) -> Result<()> {
        Self::validate_router(&config.router)?;
        Self::validate_session(&config.session)?;
        Self::validate_shards(config)?;
        Self::validate_functions(&config.functions)?;
        Self::validate_rules(config)?;

        Ok(())
    }

    fn validate_router(router: &crate::RouterSection) -> Result<()> {
        if router.enable_cache && router.cache_size == 0 {
            return Err(ShardBridgeError::config(
                "Routing cache size must be greater than 0 when caching is enabled",
            ));
        }

        if router.shard_separator.is_empty() {
            return Err(ShardBridgeError::config("Shard separator cannot be empty"));
        }

        Ok(())
    }

    fn validate_session(session: &crate::SessionSection) -> Result<()> {
        if session.default_shard_name.trim().is_empty() {
            return Err(ShardBridgeError::config("Default shard name cannot be empty"));
        }

        if session.profile_long_running_sql && session.long_running_threshold_ms == 0 {
            return Err(ShardBridgeError::config(
                "Long running statement threshold must be greater than 0 when profiling is enabled",
            ));
        }

        if session.shutdown_timeout_secs == 0 {
            return Err(ShardBridgeError::config("Shutdown timeout must be greater than 0"));
        }

        if session.classification_pool_size == 0 {
            return Err(ShardBridgeError::config("Classification pool size must be greater than 0"));
        }

        Ok(())
    }

    fn validate_shards(config: &ShardBridgeConfig) -> Result<()> {
        let mut seen = HashSet::new();
        for shard in &config.shards {
            if shard.identity.trim().is_empty() {
                return Err(ShardBridgeError::config("Shard identity cannot be empty"));
            }

            if shard.identity == config.session.default_shard_name {
                return Err(ShardBridgeError::config(format!(
                    "Shard identity '{}' collides with the default shard name",
                    shard.identity
                )));
            }

            if !seen.insert(shard.identity.as_str()) {
                return Err(ShardBridgeError::config(format!(
                    "Duplicate shard identity: {}",
                    shard.identity
                )));
            }

            if shard.pool_size == 0 {
                return Err(ShardBridgeError::config(format!(
                    "Pool size of shard '{}' must be greater than 0",
                    shard.identity
                )));
            }
        }

        Ok(())
    }

    fn validate_functions(functions: &[crate::FunctionRecord]) -> Result<()> {
        let mut seen = HashSet::new();
        for function in functions {
            if function.name.trim().is_empty() {
                return Err(ShardBridgeError::config("Function binding name cannot be empty"));
            }

            if !seen.insert(function.name.as_str()) {
                return Err(ShardBridgeError::config(format!(
                    "Duplicate function binding: {}",
                    function.name
                )));
            }

            match function.kind {
                crate::FunctionKind::Modulo if function.argument <= 0 => {
                    return Err(ShardBridgeError::config(format!(
                        "Modulo function '{}' needs a positive divisor, got {}",
                        function.name, function.argument
                    )));
                }
                crate::FunctionKind::Modulo => {}
            }
        }

        Ok(())
    }

    fn validate_rules(config: &ShardBridgeConfig) -> Result<()> {
        let declared: HashSet<&str> = config.shards.iter().map(|s| s.identity.as_str()).collect();

        for record in &config.rules {
            Self::validate_rule(record, &config.router.shard_separator, &declared)?;
        }

        Ok(())
    }

    /// Validate one rule record against the declared shards
    pub fn validate_rule(
        record: &RuleRecord,
        separator: &str,
        declared: &HashSet<&str>,
    ) -> Result<()> {
        let pattern = match (&record.namespace, &record.statement) {
            (Some(_), Some(_)) => {
                return Err(ShardBridgeError::config(format!(
                    "Rule {} sets both namespace and statement",
                    record.describe()
                )));
            }
            (None, None) => {
                return Err(ShardBridgeError::config(
                    "Rule needs either a namespace or a statement",
                ));
            }
            (Some(pattern), None) | (None, Some(pattern)) => pattern,
        };

        if pattern.trim().is_empty() {
            return Err(ShardBridgeError::config("Rule pattern cannot be empty"));
        }

        if let Some(expression) = &record.expression {
            if expression.trim().is_empty() {
                return Err(ShardBridgeError::config(format!(
                    "Rule {} has an empty sharding expression",
                    record.describe()
                )));
            }
        }

        let shards = record.shard_list(separator);
        if shards.is_empty() {
            return Err(ShardBridgeError::config(format!(
                "Rule {} has no target shards",
                record.describe()
            )));
        }

        for shard in &shards {
            if !declared.contains(shard.as_str()) {
                return Err(ShardBridgeError::config(format!(
                    "Rule {} references undeclared shard '{}'",
                    record.describe(),
                    shard
                )));
            }
        }

        Ok(())
    }
}
