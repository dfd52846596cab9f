//! CLI command implementations

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use console::style;
use shardbridge_config::{ConfigLoader, ConfigValidator, ShardBridgeConfig};
use shardbridge_core::{Result, RoutingFact, RoutingResult, ShardBridgeError, Value};
use shardbridge_router::{router_from_config, ShardRouter};

/// Output format of `show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Toml,
    Json,
}

/// Load and validate a configuration file, honoring `SHARDBRIDGE_*` overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ShardBridgeConfig> {
    let path = path.as_ref();
    tracing::debug!("Loading configuration from {}", path.display());
    ConfigLoader::new().load_from_file(path)
}

/// Where one statement would be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub statement: String,
    pub route: RoutingResult,
    pub default_shard: String,
}

impl fmt::Display for RouteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.route.is_empty() {
            write!(f, "{} -> default data source '{}'", self.statement, self.default_shard)
        } else {
            write!(f, "{} -> {}", self.statement, self.route)
        }
    }
}

/// Resolve `statement` with a JSON `payload` against the configured rules
pub fn route(config: &ShardBridgeConfig, statement: &str, payload: &str) -> Result<RouteReport> {
    let payload = Value::from_json_str(payload)?;
    let router = router_from_config(config)?;
    let route = router.resolve(&RoutingFact::new(statement, payload))?;

    Ok(RouteReport {
        statement: statement.to_string(),
        route,
        default_shard: config.session.default_shard_name.clone(),
    })
}

/// Summary of a configuration that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub shards: usize,
    pub rules: usize,
    pub functions: usize,
    pub namespaces: Vec<String>,
}

/// Validate every section and compile every rule
pub fn validate(config: &ShardBridgeConfig) -> Result<ValidationReport> {
    ConfigValidator::validate(config)?;
    let router = router_from_config(config)?;

    Ok(ValidationReport {
        shards: config.shards.len(),
        rules: router.rule_count(),
        functions: config.functions.len(),
        namespaces: router.namespaces().into_iter().map(str::to_string).collect(),
    })
}

/// Effective configuration rendered as TOML or JSON
pub fn render_config(config: &ShardBridgeConfig, format: OutputFormat) -> Result<String> {
    let rendered = match format {
        OutputFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
    };
    rendered.map_err(|e| ShardBridgeError::config(format!("Failed to render configuration: {}", e)))
}

pub fn print_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", style("ℹ").cyan(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), message);
}
