//! Function bindings callable from sharding expressions

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use shardbridge_config::{FunctionKind, FunctionRecord};
use shardbridge_core::{Result, ShardBridgeError, Value};

/// Signature of a function callable from an expression
pub type FunctionImpl = dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync;

/// A named function resolved at rule construction time
#[derive(Clone)]
pub struct BoundFunction {
    name: String,
    function: Arc<FunctionImpl>,
}

impl BoundFunction {
    pub fn new<N, F>(name: N, function: F) -> Self
    where
        N: Into<String>,
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> std::result::Result<Value, String> {
        (self.function)(args)
    }
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction").field("name", &self.name).finish()
    }
}

/// Name → function mapping consulted when expressions are compiled
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, BoundFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous binding of the same name
    pub fn register<N, F>(&mut self, name: N, function: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let bound = BoundFunction::new(name, function);
        self.functions.insert(bound.name.clone(), bound);
        self
    }

    pub fn with<N, F>(mut self, name: N, function: F) -> Self
    where
        N: Into<String>,
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoundFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Build the bindings declared in configuration
    pub fn from_records(records: &[FunctionRecord]) -> Result<Self> {
        let mut registry = Self::new();
        for record in records {
            if registry.contains(&record.name) {
                return Err(ShardBridgeError::config(format!(
                    "Duplicate function binding: {}",
                    record.name
                )));
            }
            match record.kind {
                FunctionKind::Modulo => {
                    if record.argument <= 0 {
                        return Err(ShardBridgeError::config(format!(
                            "Modulo function '{}' needs a positive divisor, got {}",
                            record.name, record.argument
                        )));
                    }
                    registry.register(record.name.clone(), modulo(record.argument));
                }
            }
        }
        Ok(registry)
    }
}

/// `f(x) = x mod divisor`, always non-negative
///
/// A divisor that is not positive makes every call fail, so a rule using it
/// never matches.
pub fn modulo(
    divisor: i64,
) -> impl Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static {
    move |args: &[Value]| {
        let value = match args {
            [value] => value,
            _ => return Err(format!("expects 1 argument, got {}", args.len())),
        };
        let number = match value {
            Value::Int(i) => *i,
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("'{}' is not an integer", s))?,
            other => return Err(format!("expects an integer, got {}", other.kind())),
        };
        if divisor <= 0 {
            return Err(format!("divisor must be positive, got {}", divisor));
        }
        number
            .checked_rem_euclid(divisor)
            .map(Value::Int)
            .ok_or_else(|| "arithmetic overflow".to_string())
    }
}
