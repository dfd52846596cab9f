//! Downstream statement executor contract
//!
//! The executor owns all knowledge of SQL and object mapping. ShardBridge only
//! decides which connection a statement runs on.

use shardbridge_core::{BatchItemFailure, Result, ShardBridgeError, Value};

use crate::datasource::Connection;

/// Offset/limit hint passed through to list selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    /// No offset, no limit
    pub const UNBOUNDED: RowBounds = RowBounds {
        offset: 0,
        limit: usize::MAX,
    };

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::UNBOUNDED
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Runs statements against a borrowed connection
pub trait StatementExecutor: Send + Sync {
    /// Run an insert, returning the affected row count
    fn insert(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64>;

    /// Run an update, returning the affected row count
    fn update(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64>;

    /// Run a delete, returning the affected row count
    fn delete(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<u64>;

    /// Run a query returning rows
    fn select_list(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
        bounds: RowBounds,
    ) -> Result<Vec<Value>>;

    /// Run a query returning at most one row
    fn select_one(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        parameter: &Value,
    ) -> Result<Option<Value>>;

    /// Insert a collection in one go. The default runs `insert` per entity.
    fn insert_batch(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        entities: &[Value],
    ) -> Result<u64> {
        run_batch(statement, entities, |entity| self.insert(&mut *connection, statement, entity))
    }

    /// Update a collection in one go. The default runs `update` per entity.
    fn update_batch(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        entities: &[Value],
    ) -> Result<u64> {
        run_batch(statement, entities, |entity| self.update(&mut *connection, statement, entity))
    }

    /// Delete a collection in one go. The default runs `delete` per entity.
    fn delete_batch(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        entities: &[Value],
    ) -> Result<u64> {
        run_batch(statement, entities, |entity| self.delete(&mut *connection, statement, entity))
    }

    /// Resolved statement text for auditing, when the executor can produce it
    fn statement_text(&self, _statement: &str, _parameter: &Value) -> Option<String> {
        None
    }
}

/// Run `op` for every item, attempting all of them.
///
/// Returns the summed count, or `PartialBatch` listing every failed item.
pub fn run_batch<F>(statement: &str, items: &[Value], mut op: F) -> Result<u64>
where
    F: FnMut(&Value) -> Result<u64>,
{
    let mut total = 0u64;
    let mut succeeded = 0usize;
    let mut failures = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match op(item) {
            Ok(count) => {
                total += count;
                succeeded += 1;
            }
            Err(cause) => {
                tracing::debug!("Batch '{}' item #{} failed: {}", statement, index, cause);
                failures.push(BatchItemFailure { index, cause });
            }
        }
    }

    if failures.is_empty() {
        Ok(total)
    } else {
        Err(ShardBridgeError::PartialBatch {
            statement: statement.to_string(),
            succeeded,
            failures,
        })
    }
}
