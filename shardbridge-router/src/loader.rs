//! Turn flat rule records into a router

use shardbridge_config::{RouterSection, RuleRecord, ShardBridgeConfig};
use shardbridge_core::{Result, ShardBridgeError};

use crate::functions::FunctionRegistry;
use crate::router::{Router, RouterBuilder};
use crate::rule::Rule;

/// Builds rules out of `RuleRecord`s
pub struct RuleLoader<'a> {
    functions: &'a FunctionRegistry,
    separator: String,
}

impl<'a> RuleLoader<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            functions,
            separator: shardbridge_config::DEFAULT_SHARD_SEPARATOR.to_string(),
        }
    }

    /// Separator between shard identities in `RuleRecord::shards`
    pub fn with_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    /// Build the rule a record describes, picking its tier from its shape
    pub fn load_rule(&self, record: &RuleRecord) -> Result<Rule> {
        let shards = record.shard_list(&self.separator);
        if shards.is_empty() {
            return Err(ShardBridgeError::config(format!(
                "Rule {} has no target shards",
                record.describe()
            )));
        }

        let expression = record.expression.as_deref();
        match (&record.namespace, &record.statement, expression) {
            (Some(namespace), None, None) => Rule::namespace(namespace.as_str(), shards),
            (Some(namespace), None, Some(expression)) => Rule::namespace_with_expression(
                namespace.as_str(),
                shards,
                expression,
                self.functions,
            ),
            (None, Some(statement), None) => Rule::statement(statement.as_str(), shards),
            (None, Some(statement), Some(expression)) => Rule::statement_with_expression(
                statement.as_str(),
                shards,
                expression,
                self.functions,
            ),
            (Some(_), Some(_), _) => Err(ShardBridgeError::config(format!(
                "Rule {} sets both namespace and statement",
                record.describe()
            ))),
            (None, None, _) => Err(ShardBridgeError::config(
                "Rule needs either a namespace or a statement",
            )),
        }
    }

    pub fn load_rules(&self, records: &[RuleRecord]) -> Result<Vec<Rule>> {
        records.iter().map(|record| self.load_rule(record)).collect()
    }

    /// Builder seeded with every record's rule
    pub fn builder(&self, records: &[RuleRecord]) -> Result<RouterBuilder> {
        Ok(Router::builder().rules(self.load_rules(records)?))
    }
}

/// Router described by a configuration's `router`, `functions` and `rules` sections
pub fn router_from_config(config: &ShardBridgeConfig) -> Result<Router> {
    let functions = FunctionRegistry::from_records(&config.functions)?;
    router_with_functions(&config.router, &config.rules, &functions)
}

/// Router over `records`, with additional programmatic function bindings
pub fn router_with_functions(
    section: &RouterSection,
    records: &[RuleRecord],
    functions: &FunctionRegistry,
) -> Result<Router> {
    let mut builder = RuleLoader::new(functions)
        .with_separator(section.shard_separator.as_str())
        .builder(records)?;

    if section.enable_cache {
        builder = builder.with_cache(section.cache_size);
    }

    builder.build()
}
