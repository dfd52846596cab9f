//! Configuration loading and management

use std::path::{Path, PathBuf};

use shardbridge_core::{Result, ShardBridgeError};

use crate::{ConfigValidator, ShardBridgeConfig};

/// Local configuration file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "shardbridge.toml";

/// Prefix of environment variable overrides, e.g. `SHARDBRIDGE_ROUTER__ENABLE_CACHE`
pub const ENV_PREFIX: &str = "SHARDBRIDGE";

/// Configuration loader with hierarchical loading support
pub struct ConfigLoader {
    /// Search paths for configuration files
    search_paths: Vec<String>,
    /// Whether environment overrides are applied
    use_environment: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: vec![
                "/etc/shardbridge".to_string(),
                "~/.shardbridge".to_string(),
            ],
            use_environment: true,
        }
    }

    pub fn with_search_paths(mut self, paths: Vec<String>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Skip `SHARDBRIDGE_*` environment overrides
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest precedence)
    /// 2. Local configuration file (shardbridge.toml)
    /// 3. `config.toml` in each search path, later paths overriding earlier ones
    /// 4. Default values (lowest precedence)
    pub fn load(&self) -> Result<ShardBridgeConfig> {
        let mut builder = self.base_builder()?;

        for path in self.find_config_files("config.toml") {
            tracing::debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        if Path::new(LOCAL_CONFIG_FILE).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(LOCAL_CONFIG_FILE)));
        }

        self.finish(builder)
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<ShardBridgeConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ShardBridgeError::config(format!(
                "Configuration file does not exist: {}",
                path.display()
            )));
        }

        let builder = self.base_builder()?.add_source(
            config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
        );

        self.finish(builder)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, config: &ShardBridgeConfig, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ShardBridgeError::config(format!("Failed to serialize configuration: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ShardBridgeError::config(format!("Failed to write configuration file: {}", e))
        })?;

        Ok(())
    }

    fn base_builder(&self) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = toml::to_string_pretty(&ShardBridgeConfig::default()).map_err(|e| {
            ShardBridgeError::internal(format!("Failed to serialize default configuration: {}", e))
        })?;

        Ok(config::Config::builder()
            .add_source(config::File::from_str(&defaults, config::FileFormat::Toml)))
    }

    fn finish(
        &self,
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ShardBridgeConfig> {
        if self.use_environment {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config = builder.build().map_err(|e| {
            ShardBridgeError::config(format!("Failed to build configuration: {}", e))
        })?;

        let shardbridge_config: ShardBridgeConfig = config.try_deserialize().map_err(|e| {
            ShardBridgeError::config(format!("Failed to deserialize configuration: {}", e))
        })?;

        ConfigValidator::validate(&shardbridge_config)?;

        Ok(shardbridge_config)
    }

    fn find_config_files(&self, filename: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for search_path in &self.search_paths {
            let expanded_path = if let Some(rest) = search_path.strip_prefix("~/") {
                match std::env::var_os("HOME") {
                    Some(home) => PathBuf::from(home).join(rest).join(filename),
                    None => continue,
                }
            } else {
                PathBuf::from(search_path).join(filename)
            };

            if expanded_path.exists() {
                found.push(expanded_path);
            }
        }
        found
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
