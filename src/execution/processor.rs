//! Concurrent fan-out of one round of requests across shards
//!
//! A round runs in five phases:
//!
//! 1. acquire a connection for every request, before anything is dispatched
//! 2. dispatch every action to the worker pool of its shard
//! 3. wait until every dispatched action has completed
//! 4. release every acquired connection exactly once
//! 5. return the results in submission order, or one aggregated failure

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use shardbridge_core::{Result, ShardBridgeError, ShardId, TaskFailure};

use crate::datasource::{Connection, DataSource};
use crate::execution::pool::WorkerPool;

/// Work to run against one borrowed connection
pub type Action<R> = Box<dyn FnOnce(&mut dyn Connection) -> Result<R> + Send + 'static>;

/// One shard's share of a fan-out round
pub struct ConcurrentRequest<R> {
    pub shard: ShardId,
    pub data_source: Arc<dyn DataSource>,
    pub pool: Arc<WorkerPool>,
    pub action: Action<R>,
}

impl<R> ConcurrentRequest<R> {
    pub fn new<F>(
        shard: ShardId,
        data_source: Arc<dyn DataSource>,
        pool: Arc<WorkerPool>,
        action: F,
    ) -> Self
    where
        F: FnOnce(&mut dyn Connection) -> Result<R> + Send + 'static,
    {
        Self {
            shard,
            data_source,
            pool,
            action: Box::new(action),
        }
    }
}

impl<R> fmt::Debug for ConcurrentRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentRequest")
            .field("shard", &self.shard)
            .field("pool", &self.pool.name())
            .finish()
    }
}

struct Completion<R> {
    index: usize,
    connection: Box<dyn Connection>,
    outcome: Result<R>,
}

/// Executes a round of `ConcurrentRequest`s and joins them
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentRequestProcessor;

impl ConcurrentRequestProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Run every request of `statement` concurrently.
    ///
    /// Results come back in submission order. Failures name `statement`.
    pub fn process<R: Send + 'static>(
        &self,
        statement: &str,
        requests: Vec<ConcurrentRequest<R>>,
    ) -> Result<Vec<R>> {
        let count = requests.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        // Phase 1: acquire
        let mut acquired: Vec<(ConcurrentRequest<R>, Box<dyn Connection>)> =
            Vec::with_capacity(count);
        for request in requests {
            match request.data_source.connection() {
                Ok(connection) => acquired.push((request, connection)),
                Err(source) => {
                    for (held, connection) in acquired {
                        release(&held.shard, &held.data_source, connection);
                    }
                    return Err(ShardBridgeError::connection_acquisition(
                        statement,
                        request.shard,
                        source,
                    ));
                }
            }
        }

        // Phase 2: dispatch
        let (sender, receiver) = crossbeam_channel::unbounded::<Completion<R>>();
        let mut routes: Vec<(ShardId, Arc<dyn DataSource>)> = Vec::with_capacity(count);

        for (index, (request, connection)) in acquired.into_iter().enumerate() {
            let ConcurrentRequest {
                shard,
                data_source,
                pool,
                action,
            } = request;
            routes.push((shard, data_source));

            let sender = sender.clone();
            let statement = statement.to_string();
            pool.execute(move || {
                let mut connection = connection;
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| action(connection.as_mut())))
                        .unwrap_or_else(|payload| {
                            Err(ShardBridgeError::statement(
                                statement,
                                panic_message(payload.as_ref()),
                            ))
                        });
                let _ = sender.send(Completion {
                    index,
                    connection,
                    outcome,
                });
            });
        }
        drop(sender);

        // Phase 3: join
        let mut completions: Vec<Option<Completion<R>>> = (0..count).map(|_| None).collect();
        let mut received = 0;
        while received < count {
            match receiver.recv() {
                Ok(completion) => {
                    let index = completion.index;
                    completions[index] = Some(completion);
                    received += 1;
                }
                // every sender is gone, so whatever has not reported never will
                Err(_) => break,
            }
        }

        // Phase 4: release
        let mut results = Vec::with_capacity(count);
        let mut failures = Vec::new();
        for (index, completion) in completions.into_iter().enumerate() {
            let (shard, data_source) = &routes[index];
            match completion {
                Some(Completion {
                    connection,
                    outcome,
                    ..
                }) => {
                    release(shard, data_source, connection);
                    match outcome {
                        Ok(value) => results.push(value),
                        Err(cause) => failures.push(TaskFailure {
                            shard: shard.clone(),
                            cause: cause.on_shard(shard),
                        }),
                    }
                }
                None => failures.push(TaskFailure {
                    shard: shard.clone(),
                    cause: ShardBridgeError::concurrency(
                        statement,
                        "Task was lost before reporting completion",
                        Vec::new(),
                    ),
                }),
            }
        }

        // Phase 5: collect
        if failures.is_empty() {
            Ok(results)
        } else {
            Err(ShardBridgeError::concurrency(
                statement,
                format!("{} of {} concurrent request(s) failed", failures.len(), count),
                failures,
            ))
        }
    }
}

/// Run an action of `statement` on the calling thread with scoped acquire/release
pub fn execute_on<R, F>(
    statement: &str,
    shard: &ShardId,
    data_source: &Arc<dyn DataSource>,
    action: F,
) -> Result<R>
where
    F: FnOnce(&mut dyn Connection) -> Result<R>,
{
    let connection = data_source.connection().map_err(|source| {
        ShardBridgeError::connection_acquisition(statement, shard.clone(), source)
    })?;

    let mut lease = Lease {
        shard,
        data_source,
        connection: Some(connection),
    };
    let outcome = match lease.connection.as_mut() {
        Some(connection) => action(connection.as_mut()),
        None => Err(ShardBridgeError::internal("Connection lease is empty")),
    };
    drop(lease);

    outcome.map_err(|e| e.on_shard(shard))
}

/// Releases its connection when dropped, including while unwinding
struct Lease<'a> {
    shard: &'a ShardId,
    data_source: &'a Arc<dyn DataSource>,
    connection: Option<Box<dyn Connection>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            release(self.shard, self.data_source, connection);
        }
    }
}

fn release(shard: &ShardId, data_source: &Arc<dyn DataSource>, connection: Box<dyn Connection>) {
    if let Err(e) = data_source.release(connection) {
        tracing::warn!("Failed to release connection of shard '{}': {}", shard, e);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
