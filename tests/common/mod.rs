//! Common test utilities and helpers

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shardbridge::{
    Connection, DataSource, RowBounds, ShardDescriptor, ShardRegistry, ShardRouter, ShardSession,
    StatementExecutor,
};
use shardbridge_core::{BoxError, Result, ShardBridgeError, ShardId, Value};
use shardbridge_router::{FunctionRegistry, Rule};

pub const SHARDS: [&str; 3] = ["s1", "s2", "s3"];

/// Connection that only knows which shard it belongs to
pub struct MemoryConnection {
    pub shard: String,
}

impl Connection for MemoryConnection {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Data source counting every acquire and release
pub struct CountingDataSource {
    pub name: String,
    acquired: AtomicUsize,
    released: AtomicUsize,
    refuse: AtomicBool,
}

impl CountingDataSource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Make every later `connection` call fail
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }
}

impl DataSource for CountingDataSource {
    fn connection(&self) -> std::result::Result<Box<dyn Connection>, BoxError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(format!("{} refuses connections", self.name).into());
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shard: self.name.clone(),
        }))
    }

    fn release(&self, _connection: Box<dyn Connection>) -> std::result::Result<(), BoxError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Executor answering from per-shard canned responses
#[derive(Default)]
pub struct ScriptedExecutor {
    counts: HashMap<String, u64>,
    rows: HashMap<String, Vec<Value>>,
    scalars: HashMap<String, Option<Value>>,
    failing: Option<String>,
    panicking: Option<String>,
    /// Every call as (shard, statement, parameter)
    pub calls: Mutex<Vec<(String, String, Value)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, shard: &str, count: u64) -> Self {
        self.counts.insert(shard.to_string(), count);
        self
    }

    pub fn with_rows(mut self, shard: &str, rows: Vec<Value>) -> Self {
        self.rows.insert(shard.to_string(), rows);
        self
    }

    pub fn with_scalar(mut self, shard: &str, scalar: Option<Value>) -> Self {
        self.scalars.insert(shard.to_string(), scalar);
        self
    }

    /// Fail every statement issued on `shard`
    pub fn failing_on(mut self, shard: &str) -> Self {
        self.failing = Some(shard.to_string());
        self
    }

    /// Panic inside every statement issued on `shard`
    pub fn panicking_on(mut self, shard: &str) -> Self {
        self.panicking = Some(shard.to_string());
        self
    }

    /// Shards that received `statement`, sorted
    pub fn shards_called(&self, statement: &str) -> Vec<String> {
        let mut shards: Vec<String> = self
            .calls
            .lock()
            .iter()
            .filter(|(_, called, _)| called == statement)
            .map(|(shard, _, _)| shard.clone())
            .collect();
        shards.sort();
        shards
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<String> {
        let shard = connection
            .downcast_mut::<MemoryConnection>()
            .map(|c| c.shard.clone())
            .ok_or_else(|| ShardBridgeError::internal("unexpected connection type"))?;

        self.calls
            .lock()
            .push((shard.clone(), statement.to_string(), parameter.clone()));

        if self.panicking.as_deref() == Some(shard.as_str()) {
            panic!("driver bug on {}", shard);
        }
        if self.failing.as_deref() == Some(shard.as_str()) {
            return Err(ShardBridgeError::statement(statement, "injected failure"));
        }
        Ok(shard)
    }

    fn count(&self, shard: &str) -> u64 {
        self.counts.get(shard).copied().unwrap_or(1)
    }
}

impl StatementExecutor for ScriptedExecutor {
    fn insert(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64> {
        self.record(connection, statement, parameter)?;
        Ok(parameter.batch_entities().map_or(1, |entities| entities.len() as u64))
    }

    fn update(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64> {
        let shard = self.record(connection, statement, parameter)?;
        Ok(self.count(&shard))
    }

    fn delete(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64> {
        let shard = self.record(connection, statement, parameter)?;
        Ok(self.count(&shard))
    }

    fn select_list(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
        bounds: RowBounds,
    ) -> Result<Vec<Value>> {
        let shard = self.record(connection, statement, parameter)?;
        let rows = self.rows.get(&shard).cloned().unwrap_or_default();
        Ok(rows.into_iter().skip(bounds.offset).take(bounds.limit).collect())
    }

    fn select_one(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<Option<Value>> {
        let shard = self.record(connection, statement, parameter)?;
        Ok(self.scalars.get(&shard).cloned().flatten())
    }

    fn statement_text(&self, statement: &str, _parameter: &Value) -> Option<String> {
        Some(format!("-- {}", statement))
    }
}

/// Default data source plus shards s1..s3, each backed by a counting source
pub struct Fixture {
    pub default_source: Arc<CountingDataSource>,
    pub sources: HashMap<String, Arc<CountingDataSource>>,
}

impl Fixture {
    pub fn new() -> Self {
        let sources = SHARDS
            .iter()
            .map(|name| (name.to_string(), CountingDataSource::new(name)))
            .collect();
        Self {
            default_source: CountingDataSource::new("default"),
            sources,
        }
    }

    pub fn source(&self, shard: &str) -> &Arc<CountingDataSource> {
        &self.sources[shard]
    }

    pub fn registry(&self) -> ShardRegistry {
        let mut builder = ShardRegistry::builder()
            .default_data_source(self.default_source.clone())
            .default_pool_size(4);
        for name in SHARDS {
            let descriptor = ShardDescriptor::new(name, self.sources[name].clone()).pool_size(2);
            builder = builder.shard(descriptor);
        }
        builder.build().unwrap()
    }

    /// Data sources keyed by name, as `ShardRegistry::from_config` expects them
    pub fn source_map(&self) -> HashMap<String, Arc<dyn DataSource>> {
        self.sources
            .iter()
            .map(|(name, source)| (name.clone(), source.clone() as Arc<dyn DataSource>))
            .collect()
    }

    pub fn session(
        &self,
        router: Arc<dyn ShardRouter>,
        executor: Arc<ScriptedExecutor>,
    ) -> ShardSession {
        ShardSession::builder()
            .executor(executor)
            .router(router)
            .registry(self.registry())
            .build()
            .unwrap()
    }

    /// Every connection acquired so far has been released
    pub fn all_released(&self) -> bool {
        std::iter::once(&self.default_source)
            .chain(self.sources.values())
            .all(|source| source.acquired() == source.released())
    }
}

pub fn shard_ids(names: &[&str]) -> Vec<ShardId> {
    names.iter().map(|name| ShardId::from(*name)).collect()
}

/// Statement rule guarded by an expression that calls no functions
pub fn statement_rule(statement: &str, shards: &[&str], expression: &str) -> Rule {
    let functions = FunctionRegistry::new();
    Rule::statement_with_expression(statement, shard_ids(shards), expression, &functions).unwrap()
}

/// Namespace rule guarded by an expression that calls no functions
pub fn namespace_rule(namespace: &str, shards: &[&str], expression: &str) -> Rule {
    let functions = FunctionRegistry::new();
    Rule::namespace_with_expression(namespace, shard_ids(shards), expression, &functions).unwrap()
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Int(*v)).collect()
}

pub fn entity(id: i64) -> Value {
    Value::record([("id", Value::Int(id))])
}
