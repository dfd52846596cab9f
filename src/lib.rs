//! # ShardBridge
//!
//! Client-side database sharding middleware. A [`ShardSession`] routes every
//! insert, update, delete and select call to the shards its rules select,
//! executes it on one shard directly or on several shards concurrently, and
//! merges the per-shard results into one logical result.
//!
//! ## Architecture
//!
//! - **Core** (`shardbridge-core`): error taxonomy, payload values, routing facts
//! - **Configuration** (`shardbridge-config`): TOML/environment configuration
//! - **Routing** (`shardbridge-router`): sharding expressions, rules, router, cache
//! - **Execution** (this crate): shard registry, worker pools, concurrent
//!   fan-out, mergers, auditing and the session façade
//!
//! Running statements is delegated to a [`StatementExecutor`] and opening
//! connections to one [`DataSource`] per shard, both supplied by the
//! embedding application.

#![warn(rust_2018_idioms, unused_qualifications)]
#![deny(unsafe_code)]

/// Fire-and-forget statement auditing
pub mod audit;

/// Connection resource seams
pub mod datasource;

/// Worker pools and concurrent fan-out
pub mod execution;

/// Downstream statement executor contract
pub mod executor;

/// Logging initialization
pub mod logging;

/// Per-statement merging of partial results
pub mod merger;

/// Shard identity to data source mapping
pub mod registry;

/// Routing and dispatch façade
pub mod session;

pub use audit::{AuditDispatcher, SqlAuditor};
pub use datasource::{
    Connection, DataSource, DataSourcePostProcessor, HaDataSourceCreator, NonHaDataSourceCreator,
};
pub use execution::{ConcurrentRequest, ConcurrentRequestProcessor, PoolConfig, WorkerPool};
pub use executor::{run_batch, RowBounds, StatementExecutor};
pub use merger::{compare_values, ConcatMerger, Merger, SortingMerger};
pub use registry::{ShardDescriptor, ShardInfo, ShardRegistry, ShardRegistryBuilder};
pub use session::{ShardSession, ShardSessionBuilder};

pub use shardbridge_config::{ConfigLoader, ConfigValidator, ShardBridgeConfig};
pub use shardbridge_core::{Result, RoutingFact, RoutingResult, ShardBridgeError, ShardId, Value};
pub use shardbridge_router::{FunctionRegistry, Router, Rule, ShardRouter};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
