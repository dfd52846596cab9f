//! Batch helpers and per-entity regrouping of batch inserts

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use shardbridge_core::{
    AmbiguousEntity, Result, RoutingFact, RoutingResult, ShardBridgeError, ShardId, Value,
};
use shardbridge_router::ShardRouter;

use super::ShardSession;
use crate::datasource::Connection;
use crate::execution::{execute_on, ConcurrentRequest};
use crate::executor::{run_batch, StatementExecutor};

impl ShardSession {
    /// Insert every entity.
    ///
    /// Partitioned sessions route each entity through [`ShardSession::insert`];
    /// otherwise the whole collection goes to the executor's batch insert on the
    /// default data source. Every entity is attempted; failures come back as one
    /// `PartialBatch` error.
    pub fn batch_insert(&self, statement: &str, entities: &[Value]) -> Result<u64> {
        self.batch_with(statement, entities, Self::insert, |executor, connection, stmt, all| {
            executor.insert_batch(connection, stmt, all)
        })
    }

    pub fn batch_update(&self, statement: &str, entities: &[Value]) -> Result<u64> {
        self.batch_with(statement, entities, Self::update, |executor, connection, stmt, all| {
            executor.update_batch(connection, stmt, all)
        })
    }

    pub fn batch_delete(&self, statement: &str, entities: &[Value]) -> Result<u64> {
        self.batch_with(statement, entities, Self::delete, |executor, connection, stmt, all| {
            executor.delete_batch(connection, stmt, all)
        })
    }

    fn batch_with<S, B>(
        &self,
        statement: &str,
        entities: &[Value],
        single: S,
        batched: B,
    ) -> Result<u64>
    where
        S: Fn(&Self, &str, &Value) -> Result<u64>,
        B: FnOnce(&dyn StatementExecutor, &mut dyn Connection, &str, &[Value]) -> Result<u64>,
    {
        self.ensure_open()?;

        if self.router.is_some() {
            return run_batch(statement, entities, |entity| single(self, statement, entity));
        }

        if self.auditor.is_some() {
            self.audit(statement, &Value::batch(entities.iter().cloned()));
        }
        let started = std::time::Instant::now();
        let shard = &self.registry.default_shard().identity;
        let data_source = self.registry.default_data_source();
        let outcome = execute_on(statement, shard, data_source, |connection| {
            batched(self.executor.as_ref(), connection, statement, entities)
        });
        self.finish(statement, started, &RoutingResult::empty());
        outcome
    }

    /// Route every entity on its own, then insert one batch per shard group
    pub(super) fn insert_regrouped(&self, statement: &str, entities: &[Value]) -> Result<u64> {
        let router = self
            .router
            .as_ref()
            .ok_or_else(|| ShardBridgeError::internal("Regrouping requires a router"))?;
        let routes = self.classify(router, statement, entities)?;

        let default_shard = &self.registry.default_shard().identity;
        let mut groups: BTreeMap<ShardId, Vec<Value>> = BTreeMap::new();
        let mut ambiguous = Vec::new();

        for (index, (entity, route)) in entities.iter().zip(routes).enumerate() {
            let mut shards = route.into_shards();
            match shards.len() {
                0 => groups.entry(default_shard.clone()).or_default().push(entity.clone()),
                1 => groups.entry(shards.remove(0)).or_default().push(entity.clone()),
                _ => ambiguous.push(AmbiguousEntity { index, shards }),
            }
        }

        if !ambiguous.is_empty() {
            return Err(ShardBridgeError::AmbiguousEntityRouting {
                statement: statement.to_string(),
                entities: ambiguous,
            });
        }

        tracing::debug!(
            "Regrouped {} entities of '{}' into {} shard group(s)",
            entities.len(),
            statement,
            groups.len()
        );

        let mut requests = Vec::with_capacity(groups.len());
        for (shard, group) in groups {
            let data_source = Arc::clone(self.data_source(&shard)?);
            let pool = self.pool(&shard)?;
            let executor = Arc::clone(&self.executor);
            let owned = statement.to_string();
            let batch = Value::Batch(group);

            requests.push(ConcurrentRequest::new(
                shard,
                data_source,
                pool,
                move |connection| executor.insert(connection, &owned, &batch),
            ));
        }

        let counts = self.processor.process(statement, requests)?;
        Ok(counts.iter().sum())
    }

    /// Resolve one fact per entity on the classification pool.
    ///
    /// Returns only once every entity has been classified, routes in entity order.
    fn classify(
        &self,
        router: &Arc<dyn ShardRouter>,
        statement: &str,
        entities: &[Value],
    ) -> Result<Vec<RoutingResult>> {
        self.classifier.install(|| {
            entities
                .par_iter()
                .map(|entity| router.resolve(&RoutingFact::new(statement, entity.clone())))
                .collect()
        })
    }
}
