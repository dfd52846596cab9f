//! Sharding expression language
//!
//! A small boolean language evaluated against the payload of a routing fact.
//! Record fields are addressed by bare name (`id >= 10000 and id < 20000`),
//! `$ROOT` is the payload itself, and calls resolve either to a bound function
//! (`mod(id)`, `mod.apply(id)`) or to a built-in string method
//! (`name.startsWith("A")`, or bare `startsWith("A")` on a scalar payload).
//!
//! Function names are resolved once, when the expression is compiled. Any
//! failure during evaluation (missing field, null payload, wrong type) counts
//! as "no match".

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::fmt;

use shardbridge_core::{Result, ShardBridgeError, Value};

use crate::functions::FunctionRegistry;
use ast::Expr;
use parser::ExpressionParser;

/// Compile-time expression errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("expected {expected}, found {found} at offset {offset}")]
    ExpectedToken {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    #[error("'{name}' takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// Evaluation-time errors; a rule treats all of them as "no match"
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("payload is null")]
    NullPayload,
    #[error("field '{0}' is missing")]
    MissingField(String),
    #[error("cannot read field '{field}' of a {kind}")]
    NotARecord { field: String, kind: &'static str },
    #[error("'{op}' cannot be applied to {operands}")]
    TypeMismatch { op: String, operands: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("function '{name}' failed: {message}")]
    Function { name: String, message: String },
    #[error("expression produced a {0}, expected a boolean")]
    NotBoolean(&'static str),
}

impl EvalError {
    pub fn type_mismatch(op: &str, left: &Value, right: Option<&Value>) -> Self {
        let operands = match right {
            Some(right) => format!("{} and {}", left.kind(), right.kind()),
            None => left.kind().to_string(),
        };
        Self::TypeMismatch {
            op: op.to_string(),
            operands,
        }
    }
}

/// A compiled sharding expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Compile `source`, resolving function calls against `functions`
    pub fn compile(source: &str, functions: &FunctionRegistry) -> Result<Self> {
        let ast = ExpressionParser::new(functions)
            .parse(source)
            .map_err(|e| ShardBridgeError::expression(source, e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a payload, requiring a boolean outcome
    pub fn evaluate(&self, payload: &Value) -> std::result::Result<bool, EvalError> {
        match eval::evaluate(&self.ast, payload)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NotBoolean(other.kind())),
        }
    }

    /// Evaluate against a payload, mapping every evaluation failure to `false`
    pub fn matches(&self, payload: &Value) -> bool {
        match self.evaluate(payload) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::debug!("Expression [{}] treated as no match: {}", self.source, e);
                false
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_reports_expression_error() {
        let err = Expression::compile("id >", &FunctionRegistry::new()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("id >"));
    }

    #[test]
    fn test_non_boolean_result_is_no_match() {
        let expression = Expression::compile("id + 1", &FunctionRegistry::new()).unwrap();
        let payload = Value::record([("id", Value::Int(1))]);

        assert_eq!(expression.evaluate(&payload), Err(EvalError::NotBoolean("int")));
        assert!(!expression.matches(&payload));
    }

    #[test]
    fn test_null_payload_is_no_match() {
        let expression = Expression::compile("id < 100", &FunctionRegistry::new()).unwrap();
        assert!(!expression.matches(&Value::Null));
        assert!(expression.matches(&Value::record([("id", Value::Int(5))])));
    }
}
