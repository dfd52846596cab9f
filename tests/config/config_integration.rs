//! Integration tests for configuration-driven sessions

#[path = "../common/mod.rs"]
mod common;

use std::env;
use std::fs;
use std::sync::Arc;

use common::*;
use shardbridge::{ShardRegistry, ShardSessionBuilder};
use shardbridge_config::*;
use shardbridge_core::Value;
use tempfile::TempDir;

const SHARDED: &str = r#"
[router]
enable_cache = true
cache_size = 128
shard_separator = "|"

[session]
default_shard_name = "main"
shutdown_timeout_secs = 5
classification_pool_size = 4

[[shards]]
identity = "s1"
pool_size = 2

[[shards]]
identity = "s2"
pool_size = 2
standby = "s3"

[[functions]]
name = "bucket"
kind = "modulo"
argument = 2

[[rules]]
statement = "users.create"
expression = "bucket(id) == 0"
shards = "s1"

[[rules]]
statement = "users.create"
expression = "bucket(id) == 1"
shards = "s2"

[[rules]]
namespace = "users"
shards = "s1|s2"

[logging]
level = "debug"
format = "json"
"#;

fn write_config(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_file_drives_session() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "sharded.toml", SHARDED);
    let config = ConfigLoader::new().without_environment().load_from_file(&path).unwrap();

    assert!(config.router.enable_cache);
    assert_eq!(config.session.default_shard_name, "main");
    assert_eq!(config.shards[1].standby.as_deref(), Some("s3"));
    assert_eq!(config.logging.format, LogFormat::Json);

    let fixture = Fixture::new();
    let default_source = fixture.default_source.clone();
    let registry = ShardRegistry::from_config(&config, default_source, &fixture.source_map())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(registry.default_shard().identity.as_str(), "main");
    assert!(registry.descriptors()[1].has_standby);

    let executor = Arc::new(ScriptedExecutor::new().with_count("s1", 4).with_count("s2", 6));
    let session = ShardSessionBuilder::from_config(&config)
        .unwrap()
        .executor(executor.clone())
        .registry(registry)
        .build()
        .unwrap();

    assert_eq!(session.insert("users.create", &entity(10)).unwrap(), 1);
    assert_eq!(session.insert("users.create", &entity(11)).unwrap(), 1);
    assert_eq!(executor.shards_called("users.create"), vec!["s1", "s2"]);
    assert_eq!(session.update("users.rename", &Value::Null).unwrap(), 10);
    assert_eq!(session.settings().shutdown_timeout_secs, 5);

    session.shutdown().unwrap();
}

#[test]
fn test_search_paths_layer_in_order() {
    let system = TempDir::new().unwrap();
    let user = TempDir::new().unwrap();
    write_config(&system, "config.toml", "[router]\ncache_size = 10\nenable_cache = true\n");
    write_config(&user, "config.toml", "[router]\ncache_size = 20\n");

    let config = ConfigLoader::new()
        .with_search_paths(vec![
            system.path().to_string_lossy().into_owned(),
            user.path().to_string_lossy().into_owned(),
        ])
        .without_environment()
        .load()
        .unwrap();

    assert!(config.router.enable_cache);
    assert_eq!(config.router.cache_size, 20);
}

#[test]
fn test_environment_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "env.toml", "[session]\nlong_running_threshold_ms = 100\n");

    env::set_var("SHARDBRIDGE_SESSION__LONG_RUNNING_THRESHOLD_MS", "2500");
    let loaded = ConfigLoader::new().load_from_file(&path);
    env::remove_var("SHARDBRIDGE_SESSION__LONG_RUNNING_THRESHOLD_MS");

    assert_eq!(loaded.unwrap().session.long_running_threshold_ms, 2500);
}

#[test]
fn test_invalid_rules_fail_loading() {
    let temp_dir = TempDir::new().unwrap();

    let both = write_config(
        &temp_dir,
        "both.toml",
        concat!(
            "[[shards]]\nidentity = \"s1\"\n\n",
            "[[rules]]\nnamespace = \"users\"\nstatement = \"users.get\"\nshards = \"s1\"\n",
        ),
    );
    assert!(ConfigLoader::new().without_environment().load_from_file(&both).is_err());

    let blank = write_config(
        &temp_dir,
        "blank.toml",
        "[[shards]]\nidentity = \"s1\"\n\n[[rules]]\nnamespace = \"users\"\nshards = \" , \"\n",
    );
    let err = ConfigLoader::new().without_environment().load_from_file(&blank).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("saved.toml");

    let mut config = ShardBridgeConfig::default();
    config.shards.push(ShardSection {
        identity: "s1".to_string(),
        pool_size: 3,
        standby: None,
    });
    config.rules.push(RuleRecord::for_namespace("orders", "s1").with_expression("id > 10"));

    let loader = ConfigLoader::new().without_environment();
    loader.save_to_file(&config, &path).unwrap();
    let reloaded = loader.load_from_file(&path).unwrap();

    assert_eq!(reloaded.shards, config.shards);
    assert_eq!(reloaded.rules.len(), 1);
    assert_eq!(reloaded.rules[0].expression.as_deref(), Some("id > 10"));
}
