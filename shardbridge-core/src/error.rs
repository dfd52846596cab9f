//! Core error types for ShardBridge

use std::fmt;

use thiserror::Error;

use crate::ShardId;

/// Boxed error used at the seams where external collaborators report failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single failed task of a concurrent fan-out round
#[derive(Debug)]
pub struct TaskFailure {
    /// Shard the task was executing against
    pub shard: ShardId,
    /// Captured cause
    pub cause: ShardBridgeError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.shard, self.cause)
    }
}

/// A single failed item of a sequential batch loop
#[derive(Debug)]
pub struct BatchItemFailure {
    /// Position of the item inside the submitted collection
    pub index: usize,
    /// Captured cause
    pub cause: ShardBridgeError,
}

/// An entity of a batch insert whose own routing fact resolved to several shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousEntity {
    /// Position of the entity inside the batch
    pub index: usize,
    /// Every shard the entity matched
    pub shards: Vec<ShardId>,
}

/// Core error type for ShardBridge operations
#[derive(Debug, Error)]
pub enum ShardBridgeError {
    /// Bad rule, descriptor or configuration value at setup time
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A sharding expression failed to compile
    #[error("Invalid sharding expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Malformed routing fact or a route to an unknown shard
    #[error("Routing error: {message}")]
    Routing { message: String },

    /// A shard's connection resource refused to hand out a connection
    #[error("Statement '{statement}' cannot acquire a connection for shard '{shard}': {source}")]
    ConnectionAcquisition {
        statement: String,
        shard: ShardId,
        source: BoxError,
    },

    /// Interrupted wait or one or more failed fan-out tasks
    #[error("Statement '{statement}' failed concurrently: {message}{}", format_failures(.failures))]
    Concurrency {
        statement: String,
        message: String,
        failures: Vec<TaskFailure>,
    },

    /// A unique-row lookup produced more than one non-null row across shards
    #[error("Statement '{statement}' returned {count} non-null results, expected at most one")]
    AmbiguousResult { statement: String, count: usize },

    /// Entities of a batch insert matched more than one shard each
    #[error("Batch '{statement}' has entities on several shards: {}", format_ambiguous(.entities))]
    AmbiguousEntityRouting {
        statement: String,
        entities: Vec<AmbiguousEntity>,
    },

    /// A sequential batch loop failed for some of its items
    #[error(
        "Batch '{statement}' failed for {} of {} item(s)",
        .failures.len(),
        .succeeded + .failures.len()
    )]
    PartialBatch {
        statement: String,
        succeeded: usize,
        failures: Vec<BatchItemFailure>,
    },

    /// The downstream executor failed to run a statement
    #[error("Statement '{statement}' failed{}: {message}", format_shard(.shard))]
    Statement {
        statement: String,
        shard: Option<ShardId>,
        message: String,
    },

    /// Use of a component outside of its lifecycle
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn format_shard(shard: &Option<ShardId>) -> String {
    match shard {
        Some(shard) => format!(" on shard '{}'", shard),
        None => String::new(),
    }
}

fn format_ambiguous(entities: &[AmbiguousEntity]) -> String {
    let described: Vec<String> = entities
        .iter()
        .map(|e| {
            let shards: Vec<&str> = e.shards.iter().map(|s| s.as_str()).collect();
            format!("#{} -> [{}]", e.index, shards.join(", "))
        })
        .collect();
    described.join("; ")
}

fn format_failures(failures: &[TaskFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let causes: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    format!(" ({} task(s) failed: {})", failures.len(), causes.join("; "))
}

impl ShardBridgeError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn expression<E: Into<String>, M: Into<String>>(expression: E, message: M) -> Self {
        Self::Expression { expression: expression.into(), message: message.into() }
    }

    /// Setup-time failures: bad configuration, rules or expressions
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Expression { .. })
    }

    pub fn routing<S: Into<String>>(message: S) -> Self {
        Self::Routing { message: message.into() }
    }

    pub fn connection_acquisition<S: Into<String>>(
        statement: S,
        shard: ShardId,
        source: BoxError,
    ) -> Self {
        Self::ConnectionAcquisition {
            statement: statement.into(),
            shard,
            source,
        }
    }

    pub fn concurrency<S: Into<String>, M: Into<String>>(
        statement: S,
        message: M,
        failures: Vec<TaskFailure>,
    ) -> Self {
        Self::Concurrency {
            statement: statement.into(),
            message: message.into(),
            failures,
        }
    }

    pub fn statement<S: Into<String>, M: Into<String>>(statement: S, message: M) -> Self {
        Self::Statement { statement: statement.into(), shard: None, message: message.into() }
    }

    pub fn lifecycle<S: Into<String>>(message: S) -> Self {
        Self::Lifecycle { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Attach the shard a statement failure happened on, if not already known
    pub fn on_shard(self, shard: &ShardId) -> Self {
        match self {
            Self::Statement { statement, shard: None, message } => Self::Statement {
                statement,
                shard: Some(shard.clone()),
                message,
            },
            other => other,
        }
    }

    /// Causes captured by a concurrent fan-out, empty for every other kind
    pub fn task_failures(&self) -> &[TaskFailure] {
        match self {
            Self::Concurrency { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Result type alias for ShardBridge operations
pub type Result<T> = std::result::Result<T, ShardBridgeError>;
