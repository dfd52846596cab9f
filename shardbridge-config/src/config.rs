//! Configuration structures for ShardBridge

use serde::{Deserialize, Serialize};
use shardbridge_core::ShardId;

/// Name under which the default (non-partitioned) data source is registered
pub const DEFAULT_SHARD_NAME: &str = "_shardbridge_default_data_source";

/// Default capacity of the routing cache
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Default separator between shard identities in a rule record
pub const DEFAULT_SHARD_SEPARATOR: &str = ",";

/// Main configuration structure for ShardBridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardBridgeConfig {
    /// Router and routing cache configuration
    pub router: RouterSection,
    /// Session façade configuration
    pub session: SessionSection,
    /// Declared shards
    pub shards: Vec<ShardSection>,
    /// Flat list of sharding rules
    pub rules: Vec<RuleRecord>,
    /// Named function bindings usable from sharding expressions
    pub functions: Vec<FunctionRecord>,
    /// Logging configuration
    pub logging: LoggingSection,
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Put a bounded LRU cache in front of rule evaluation
    pub enable_cache: bool,
    /// Capacity of the routing cache
    pub cache_size: usize,
    /// Separator between shard identities in `RuleRecord::shards`
    pub shard_separator: String,
}

/// Session façade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Identity of the default data source
    pub default_shard_name: String,
    /// Warn about statements slower than `long_running_threshold_ms`
    pub profile_long_running_sql: bool,
    /// Slow statement threshold in milliseconds
    pub long_running_threshold_ms: u64,
    /// Upper bound on waiting for worker pools at teardown
    pub shutdown_timeout_secs: u64,
    /// Threads classifying batch-insert entities, also the size of the default pool
    pub classification_pool_size: usize,
}

/// A declared shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSection {
    /// Unique identity of the shard
    pub identity: String,
    /// Maximum number of worker threads dedicated to the shard
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Standby endpoint used by high-availability data source creators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby: Option<String>,
}

/// One rule as it comes out of an external rule source.
///
/// Exactly one of `namespace` and `statement` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Namespace the rule applies to as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Fully qualified statement the rule applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    /// Sharding expression further restricting the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Separator-delimited target shard identities
    pub shards: String,
}

impl RuleRecord {
    pub fn for_namespace<N: Into<String>, S: Into<String>>(namespace: N, shards: S) -> Self {
        Self {
            namespace: Some(namespace.into()),
            shards: shards.into(),
            ..Default::default()
        }
    }

    pub fn for_statement<N: Into<String>, S: Into<String>>(statement: N, shards: S) -> Self {
        Self {
            statement: Some(statement.into()),
            shards: shards.into(),
            ..Default::default()
        }
    }

    pub fn with_expression<E: Into<String>>(mut self, expression: E) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Target shards split on `separator`, blank segments dropped
    pub fn shard_list(&self, separator: &str) -> Vec<ShardId> {
        parse_shards(&self.shards, separator)
    }

    /// Short description used in diagnostics
    pub fn describe(&self) -> String {
        let target = match (&self.namespace, &self.statement) {
            (Some(ns), None) => format!("namespace '{}'", ns),
            (None, Some(st)) => format!("statement '{}'", st),
            (Some(ns), Some(st)) => format!("namespace '{}' / statement '{}'", ns, st),
            (None, None) => "<no target>".to_string(),
        };
        match &self.expression {
            Some(expr) => format!("{} when [{}]", target, expr),
            None => target,
        }
    }
}

/// Split a separator-delimited shard list, ignoring blank segments
pub fn parse_shards(list: &str, separator: &str) -> Vec<ShardId> {
    if separator.is_empty() {
        let trimmed = list.trim();
        return if trimmed.is_empty() { Vec::new() } else { vec![ShardId::from(trimmed)] };
    }
    list.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ShardId::from)
        .collect()
}

/// A named function binding declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// Name the expression calls the function by
    pub name: String,
    /// Stock implementation backing the binding
    pub kind: FunctionKind,
    /// Argument fixed at binding time, e.g. the divisor of a modulo
    pub argument: i64,
}

/// Stock function implementations available to configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// `name(x)` yields `x mod argument`; `name.apply(x)` is accepted as well
    Modulo,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by an `EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (structured)
    Json,
    /// Human-readable format
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Pool size used when a shard does not declare one
pub fn default_pool_size() -> usize {
    available_parallelism() * 5
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            enable_cache: false,
            cache_size: DEFAULT_CACHE_SIZE,
            shard_separator: DEFAULT_SHARD_SEPARATOR.to_string(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_shard_name: DEFAULT_SHARD_NAME.to_string(),
            profile_long_running_sql: false,
            long_running_threshold_ms: 3_000,
            shutdown_timeout_secs: 300,
            classification_pool_size: default_pool_size(),
        }
    }
}

impl ShardBridgeConfig {
    /// Parse a configuration from TOML text, filling in defaults
    pub fn from_toml_str(text: &str) -> shardbridge_core::Result<Self> {
        toml::from_str(text).map_err(|e| {
            let message = format!("Failed to parse configuration: {}", e);
            shardbridge_core::ShardBridgeError::config(message)
        })
    }

    /// Identities of every declared shard, in declaration order
    pub fn shard_identities(&self) -> Vec<ShardId> {
        self.shards.iter().map(|s| ShardId::from(s.identity.as_str())).collect()
    }
}
