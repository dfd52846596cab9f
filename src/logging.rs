//! Structured logging for ShardBridge
//!
//! Filters come from the `SHARDBRIDGE_LOG` environment variable, e.g.
//! `SHARDBRIDGE_LOG=debug` or `SHARDBRIDGE_LOG=warn,shardbridge_router=debug`.
//! Only the first initialization installs a subscriber; later calls are ignored.

use shardbridge_config::{LogFormat, LoggingSection};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "SHARDBRIDGE_LOG";

/// Install the global subscriber at `info` unless `SHARDBRIDGE_LOG` says otherwise
pub fn init() {
    init_with_default("info");
}

/// Install the global subscriber with a custom default level
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_names(true)
        .compact();

    let _ = subscriber.try_init();
}

/// Install the global subscriber with JSON output
pub fn init_json() {
    init_json_with_default("info");
}

fn init_json_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .json();

    let _ = subscriber.try_init();
}

/// Install the subscriber described by a `[logging]` configuration section
pub fn init_from_config(section: &LoggingSection) {
    match section.format {
        LogFormat::Pretty => init_with_default(section.level.as_filter()),
        LogFormat::Json => init_json_with_default(section.level.as_filter()),
    }
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}
