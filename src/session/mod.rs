//! `ShardSession`: the routing, fan-out and merging façade
//!
//! Every call resolves a routing fact for its statement and payload, then picks
//! a dispatch policy from the number of resolved shards:
//!
//! - none: the default data source, on the calling thread
//! - one: that shard's data source, on the calling thread
//! - several: one concurrent request per shard, joined before returning
//!
//! Batch inserts whose wrapper routes to several shards are regrouped per
//! entity instead, see [`ShardSession::insert`].

mod batch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shardbridge_config::{SessionSection, ShardBridgeConfig};
use shardbridge_core::{Result, RoutingFact, RoutingResult, ShardBridgeError, ShardId, Value};
use shardbridge_router::{router_from_config, ShardRouter};

use crate::audit::{AuditDispatcher, SqlAuditor, DEFAULT_AUDIT_QUEUE};
use crate::datasource::{Connection, DataSource};
use crate::execution::{
    execute_on, ConcurrentRequest, ConcurrentRequestProcessor, PoolConfig, WorkerPool,
};
use crate::executor::{RowBounds, StatementExecutor};
use crate::merger::{ConcatMerger, Merger};
use crate::registry::ShardRegistry;

/// Sharding-aware entry point for insert, update, delete and select calls
pub struct ShardSession {
    executor: Arc<dyn StatementExecutor>,
    router: Option<Arc<dyn ShardRouter>>,
    registry: ShardRegistry,
    pools: HashMap<ShardId, Arc<WorkerPool>>,
    default_pool: Arc<WorkerPool>,
    classifier: rayon::ThreadPool,
    mergers: HashMap<String, Arc<dyn Merger>>,
    auditor: Option<AuditDispatcher>,
    processor: ConcurrentRequestProcessor,
    settings: SessionSection,
    closed: AtomicBool,
}

impl ShardSession {
    pub fn builder() -> ShardSessionBuilder {
        ShardSessionBuilder::new()
    }

    /// Insert `parameter`, returning the affected row count.
    ///
    /// A [`Value::Batch`] payload routed to several shards is regrouped: every
    /// entity is routed on its own, entities matching no rule go to the default
    /// data source, and each shard receives one batch insert of its group. An
    /// entity matching several shards fails the whole call before any shard is
    /// written. The summed count of a regrouped insert is only meaningful if
    /// the executor reports one row per entity.
    pub fn insert(&self, statement: &str, parameter: &Value) -> Result<u64> {
        let started = self.begin(statement, parameter)?;
        let route = self.route(statement, parameter)?;

        let outcome = match parameter.batch_entities() {
            Some(entities) if route.len() > 1 => self.insert_regrouped(statement, entities),
            _ => self
                .run_routed(statement, parameter, &route, |executor, connection, stmt, param| {
                    executor.insert(connection, stmt, param)
                })
                .map(|counts| counts.iter().sum()),
        };

        self.finish(statement, started, &route);
        outcome
    }

    /// Update rows, returning the affected row count summed over every routed shard
    pub fn update(&self, statement: &str, parameter: &Value) -> Result<u64> {
        let started = self.begin(statement, parameter)?;
        let route = self.route(statement, parameter)?;

        let outcome = self
            .run_routed(statement, parameter, &route, |executor, connection, statement, parameter| {
                executor.update(connection, statement, parameter)
            })
            .map(|counts| counts.iter().sum());

        self.finish(statement, started, &route);
        outcome
    }

    /// Delete rows, returning the affected row count summed over every routed shard
    pub fn delete(&self, statement: &str, parameter: &Value) -> Result<u64> {
        let started = self.begin(statement, parameter)?;
        let route = self.route(statement, parameter)?;

        let outcome = self
            .run_routed(statement, parameter, &route, |executor, connection, statement, parameter| {
                executor.delete(connection, statement, parameter)
            })
            .map(|counts| counts.iter().sum());

        self.finish(statement, started, &route);
        outcome
    }

    pub fn select(&self, statement: &str, parameter: &Value) -> Result<Vec<Value>> {
        self.select_with_bounds(statement, parameter, RowBounds::UNBOUNDED)
    }

    /// Query rows on every routed shard.
    ///
    /// Partial lists of several shards go through the merger registered for
    /// `statement`, or are concatenated in shard identity order. `bounds` is
    /// handed to the executor of each shard unchanged.
    pub fn select_with_bounds(
        &self,
        statement: &str,
        parameter: &Value,
        bounds: RowBounds,
    ) -> Result<Vec<Value>> {
        let started = self.begin(statement, parameter)?;
        let route = self.route(statement, parameter)?;

        let outcome = self
            .run_routed(statement, parameter, &route, move |executor, connection, stmt, param| {
                executor.select_list(connection, stmt, param, bounds)
            })
            .map(|partials| {
                if route.len() > 1 {
                    self.merge(statement, partials)
                } else {
                    partials.into_iter().flatten().collect()
                }
            });

        self.finish(statement, started, &route);
        outcome
    }

    /// Unique-row lookup.
    ///
    /// Across several shards null rows are discarded; more than one remaining
    /// row fails with `AmbiguousResult`.
    pub fn query_for_object(&self, statement: &str, parameter: &Value) -> Result<Option<Value>> {
        let started = self.begin(statement, parameter)?;
        let route = self.route(statement, parameter)?;

        let outcome = self
            .run_routed(statement, parameter, &route, |executor, connection, statement, parameter| {
                executor.select_one(connection, statement, parameter)
            })
            .and_then(|rows| {
                if route.len() <= 1 {
                    return Ok(rows.into_iter().next().flatten());
                }

                let mut found: Vec<Value> =
                    rows.into_iter().flatten().filter(|row| !row.is_null()).collect();
                match found.len() {
                    0 | 1 => Ok(found.pop()),
                    count => Err(ShardBridgeError::AmbiguousResult {
                        statement: statement.to_string(),
                        count,
                    }),
                }
            });

        self.finish(statement, started, &route);
        outcome
    }

    /// Tear down every worker pool and the audit thread.
    ///
    /// Waits up to `session.shutdown_timeout_secs` in total. Can only be called
    /// once; every later call, and every statement issued afterwards, fails
    /// with a lifecycle error.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ShardBridgeError::lifecycle("ShardSession has already been shut down"));
        }

        let timeout = Duration::from_secs(self.settings.shutdown_timeout_secs);
        let deadline = Instant::now() + timeout;

        let mut lingering = Vec::new();
        for pool in self.pools.values().chain(std::iter::once(&self.default_pool)) {
            if !pool.shutdown(deadline.saturating_duration_since(Instant::now())) {
                lingering.push(pool.name().to_string());
            }
        }
        if let Some(auditor) = &self.auditor {
            if !auditor.shutdown(deadline.saturating_duration_since(Instant::now())) {
                lingering.push("shardbridge-audit".to_string());
            }
        }

        if lingering.is_empty() {
            tracing::info!("ShardSession shut down");
        } else {
            tracing::warn!(
                "ShardSession shut down with workers still busy after {:?}: {}",
                timeout,
                lingering.join(", ")
            );
        }
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// False when the session was built without a router
    pub fn is_partitioned(&self) -> bool {
        self.router.is_some()
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSection {
        &self.settings
    }

    /// Worker pool of a shard; the default shard's identity yields the default pool
    pub fn worker_pool(&self, shard: &ShardId) -> Option<&Arc<WorkerPool>> {
        if *shard == self.registry.default_shard().identity {
            return Some(&self.default_pool);
        }
        self.pools.get(shard)
    }

    /// Shards a call would be dispatched to; empty means the default data source
    pub fn route(&self, statement: &str, parameter: &Value) -> Result<RoutingResult> {
        match &self.router {
            Some(router) => router.resolve(&RoutingFact::new(statement, parameter.clone())),
            None => Ok(RoutingResult::empty()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(ShardBridgeError::lifecycle("ShardSession has been shut down"));
        }
        Ok(())
    }

    fn begin(&self, statement: &str, parameter: &Value) -> Result<Instant> {
        self.ensure_open()?;
        self.audit(statement, parameter);
        Ok(Instant::now())
    }

    fn audit(&self, statement: &str, parameter: &Value) {
        if let Some(auditor) = &self.auditor {
            let text = self.executor.statement_text(statement, parameter);
            auditor.submit(statement, text, parameter);
        }
    }

    fn finish(&self, statement: &str, started: Instant, route: &RoutingResult) {
        if !self.settings.profile_long_running_sql {
            return;
        }

        let elapsed = started.elapsed();
        if elapsed < Duration::from_millis(self.settings.long_running_threshold_ms) {
            return;
        }

        if route.is_empty() {
            tracing::warn!(
                "Slow statement '{}' took {:?} on default data source '{}'",
                statement,
                elapsed,
                self.registry.default_shard().identity
            );
        } else {
            tracing::warn!("Slow statement '{}' took {:?} on shards {}", statement, elapsed, route);
        }
    }

    fn data_source(&self, shard: &ShardId) -> Result<&Arc<dyn DataSource>> {
        if *shard == self.registry.default_shard().identity {
            return Ok(self.registry.default_data_source());
        }
        self.registry
            .data_source(shard)
            .ok_or_else(|| {
                ShardBridgeError::routing(format!("Routed to unknown shard '{}'", shard))
            })
    }

    fn pool(&self, shard: &ShardId) -> Result<Arc<WorkerPool>> {
        self.worker_pool(shard)
            .cloned()
            .ok_or_else(|| {
                ShardBridgeError::routing(format!("No worker pool for shard '{}'", shard))
            })
    }

    /// Run `op` once per routed shard, results in shard identity order
    fn run_routed<R, F>(
        &self,
        statement: &str,
        parameter: &Value,
        route: &RoutingResult,
        op: F,
    ) -> Result<Vec<R>>
    where
        R: Send + 'static,
        F: Fn(&dyn StatementExecutor, &mut dyn Connection, &str, &Value) -> Result<R>
            + Send
            + Sync
            + 'static,
    {
        if route.len() <= 1 {
            let shard = route
                .shards()
                .first()
                .unwrap_or(&self.registry.default_shard().identity);
            let data_source = self.data_source(shard)?;
            let outcome = execute_on(statement, shard, data_source, |connection| {
                op(self.executor.as_ref(), connection, statement, parameter)
            })?;
            return Ok(vec![outcome]);
        }

        let op = Arc::new(op);
        let mut requests = Vec::with_capacity(route.len());
        for shard in route.shards() {
            let data_source = Arc::clone(self.data_source(shard)?);
            let pool = self.pool(shard)?;
            let executor = Arc::clone(&self.executor);
            let op = Arc::clone(&op);
            let statement = statement.to_string();
            let parameter = parameter.clone();

            requests.push(ConcurrentRequest::new(
                shard.clone(),
                data_source,
                pool,
                move |connection| op(executor.as_ref(), connection, &statement, &parameter),
            ));
        }

        tracing::debug!("Fanning '{}' out to shards {}", statement, route);
        self.processor.process(statement, requests)
    }

    fn merge(&self, statement: &str, partials: Vec<Vec<Value>>) -> Vec<Value> {
        match self.mergers.get(statement) {
            Some(merger) => merger.merge(partials),
            None => ConcatMerger.merge(partials),
        }
    }
}

/// Builder for `ShardSession`; `build` is the single startup validation step
pub struct ShardSessionBuilder {
    executor: Option<Arc<dyn StatementExecutor>>,
    router: Option<Arc<dyn ShardRouter>>,
    registry: Option<ShardRegistry>,
    mergers: HashMap<String, Arc<dyn Merger>>,
    auditor: Option<Arc<dyn SqlAuditor>>,
    settings: SessionSection,
}

impl ShardSessionBuilder {
    pub fn new() -> Self {
        Self {
            executor: None,
            router: None,
            registry: None,
            mergers: HashMap::new(),
            auditor: None,
            settings: SessionSection::default(),
        }
    }

    /// Session settings and, when rules are declared, a router from `config`
    pub fn from_config(config: &ShardBridgeConfig) -> Result<Self> {
        let mut builder = Self::new().settings(config.session.clone());
        if !config.rules.is_empty() {
            builder = builder.router(Arc::new(router_from_config(config)?));
        }
        Ok(builder)
    }

    pub fn executor(mut self, executor: Arc<dyn StatementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Enable partitioning; without a router every call runs on the default data source
    pub fn router(mut self, router: Arc<dyn ShardRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn registry(mut self, registry: ShardRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn merger<S: Into<String>>(mut self, statement: S, merger: Arc<dyn Merger>) -> Self {
        self.mergers.insert(statement.into(), merger);
        self
    }

    pub fn auditor(mut self, auditor: Arc<dyn SqlAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    pub fn settings(mut self, settings: SessionSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<ShardSession> {
        let executor = self
            .executor
            .ok_or_else(|| ShardBridgeError::config("A statement executor is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| ShardBridgeError::config("A shard registry is required"))?;

        if let Some(router) = &self.router {
            let undeclared: Vec<String> = router
                .known_shards()
                .into_iter()
                .filter(|shard| !registry.contains(shard))
                .map(|shard| shard.to_string())
                .collect();
            if !undeclared.is_empty() {
                return Err(ShardBridgeError::config(format!(
                    "Rules route to undeclared shard(s): {}",
                    undeclared.join(", ")
                )));
            }
        }

        let mut pools = HashMap::with_capacity(registry.len());
        for info in registry.descriptors() {
            let name = format!("shardbridge[{}]", info.identity);
            let config = PoolConfig::sized(name, info.pool_size);
            pools.insert(info.identity, Arc::new(WorkerPool::new(config)?));
        }
        let default_shard = registry.default_shard();
        let default_pool = Arc::new(WorkerPool::new(PoolConfig::sized(
            format!("shardbridge[{}]", default_shard.identity),
            default_shard.pool_size,
        ))?);

        let classifier = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.classification_pool_size)
            .thread_name(|index| format!("shardbridge-classify-{}", index))
            .build()
            .map_err(|e| {
                ShardBridgeError::config(format!("Cannot start classification pool: {}", e))
            })?;

        let auditor = match self.auditor {
            Some(auditor) => Some(AuditDispatcher::new(auditor, DEFAULT_AUDIT_QUEUE)?),
            None => None,
        };

        tracing::info!(
            "ShardSession started with {} shard(s), partitioning {}",
            registry.len(),
            if self.router.is_some() { "enabled" } else { "disabled" }
        );

        Ok(ShardSession {
            executor,
            router: self.router,
            registry,
            pools,
            default_pool,
            classifier,
            mergers: self.mergers,
            auditor,
            processor: ConcurrentRequestProcessor::new(),
            settings: self.settings,
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for ShardSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
