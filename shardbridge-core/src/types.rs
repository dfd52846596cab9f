//! Core type definitions for ShardBridge

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Result, ShardBridgeError};

/// Identity of a shard (one physical connection resource)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new<S: Into<String>>(identity: S) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(identity: &str) -> Self {
        Self(identity.to_string())
    }
}

impl From<String> for ShardId {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

/// Parameter payload handed to rule expressions and the statement executor.
///
/// `Batch` is the designated batch-insert wrapper: an insert whose payload is a
/// batch and which routes to several shards is regrouped per entity.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Batch(Vec<Value>),
}

impl Value {
    /// Build a record from `(field, value)` pairs
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap a collection of entities for a regrouped batch insert
    pub fn batch<I: IntoIterator<Item = Value>>(entities: I) -> Self {
        Value::Batch(entities.into_iter().collect())
    }

    /// Short type name, used in expression diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Batch(_) => "batch",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Field of a record; `None` for missing fields and non-record values
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of ints and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Entities of a batch-insert wrapper
    pub fn batch_entities(&self) -> Option<&[Value]> {
        match self {
            Value::Batch(entities) => Some(entities),
            _ => None,
        }
    }

    /// Convert back into JSON; batches become arrays
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Batch(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Parse a JSON document into a payload
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ShardBridgeError::config(format!("Invalid JSON payload: {}", e)))?;
        Ok(Value::from(json))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Batch(a), Value::Batch(b)) => a == b,
            _ => false,
        }
    }
}

// Floats compare by bit pattern so that payloads can key the routing cache.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(items) | Value::Batch(items) => items.hash(state),
            Value::Record(fields) => fields.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Batch(items) => write!(f, "batch[{} entities]", items.len()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Value::Record(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map(Into::into).unwrap_or(Value::Null)
    }
}

/// The `(statement identity, payload)` pair a routing decision is made about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingFact {
    action_id: String,
    payload: Value,
}

impl RoutingFact {
    pub fn new<S: Into<String>>(action_id: S, payload: Value) -> Self {
        Self {
            action_id: action_id.into(),
            payload,
        }
    }

    /// Namespace-qualified statement identity, e.g. `orders.create`
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Substring of the action id before its last `.`; the whole id when it has no dot
    pub fn namespace(&self) -> &str {
        namespace_of(&self.action_id)
    }
}

impl fmt::Display for RoutingFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action_id, self.payload)
    }
}

/// Namespace part of a dot-delimited statement identity
pub fn namespace_of(action_id: &str) -> &str {
    match action_id.rfind('.') {
        Some(pos) => &action_id[..pos],
        None => action_id,
    }
}

/// Lexicographically sorted, de-duplicated set of shards a fact routes to.
///
/// Empty means no rule matched and the default resource should be used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoutingResult {
    shards: Vec<ShardId>,
}

impl RoutingResult {
    pub fn new<I: IntoIterator<Item = ShardId>>(shards: I) -> Self {
        let mut shards: Vec<ShardId> = shards.into_iter().collect();
        shards.sort();
        shards.dedup();
        Self { shards }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn into_shards(self) -> Vec<ShardId> {
        self.shards
    }
}

impl fmt::Display for RoutingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.shards.iter().map(|s| s.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
