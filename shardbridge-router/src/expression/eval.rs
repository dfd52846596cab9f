//! Interpreter for compiled sharding expressions

use std::cmp::Ordering;

use shardbridge_core::Value;

use super::ast::{BinaryOp, Expr, Method, UnaryOp};
use super::EvalError;

/// Evaluate `expr` with `root` as the payload
pub fn evaluate(expr: &Expr, root: &Value) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Root => Ok(root.clone()),
        Expr::Field(name) => field(root, name),
        Expr::Member { target, name } => {
            let target = evaluate(target, root)?;
            field(&target, name)
        }
        Expr::Method { target, method, args } => {
            let target = evaluate(target, root)?;
            let args = evaluate_all(args, root)?;
            call_method(&target, *method, &args)
        }
        Expr::Call { function, args } => {
            let args = evaluate_all(args, root)?;
            function.call(&args).map_err(|message| EvalError::Function {
                name: function.name().to_string(),
                message,
            })
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, root)?;
            match (op, value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Negate, Value::Int(i)) => {
                    i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow)
                }
                (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnaryOp::Not, other) => Err(EvalError::type_mismatch("not", &other, None)),
                (UnaryOp::Negate, other) => Err(EvalError::type_mismatch("-", &other, None)),
            }
        }
        Expr::Binary { op: BinaryOp::And, left, right } => {
            if !truth(evaluate(left, root)?, "and")? {
                return Ok(Value::Bool(false));
            }
            truth(evaluate(right, root)?, "and").map(Value::Bool)
        }
        Expr::Binary { op: BinaryOp::Or, left, right } => {
            if truth(evaluate(left, root)?, "or")? {
                return Ok(Value::Bool(true));
            }
            truth(evaluate(right, root)?, "or").map(Value::Bool)
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, root)?;
            let right = evaluate(right, root)?;
            binary(*op, &left, &right)
        }
    }
}

fn evaluate_all(args: &[Expr], root: &Value) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|arg| evaluate(arg, root)).collect()
}

fn field(target: &Value, name: &str) -> Result<Value, EvalError> {
    match target {
        Value::Record(fields) => fields
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::MissingField(name.to_string())),
        Value::Null => Err(EvalError::NullPayload),
        other => Err(EvalError::NotARecord {
            field: name.to_string(),
            kind: other.kind(),
        }),
    }
}

fn truth(value: Value, op: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::type_mismatch(op, &other, None)),
    }
}

fn call_method(target: &Value, method: Method, args: &[Value]) -> Result<Value, EvalError> {
    match (method, target, args) {
        (Method::StartsWith, Value::Str(s), [Value::Str(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        (Method::EndsWith, Value::Str(s), [Value::Str(suffix)]) => {
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        (Method::Contains, Value::Str(s), [Value::Str(needle)]) => {
            Ok(Value::Bool(s.contains(needle.as_str())))
        }
        (Method::Contains, Value::List(items), [needle]) => Ok(Value::Bool(items.contains(needle))),
        (Method::Contains, Value::Record(fields), [Value::Str(key)]) => {
            Ok(Value::Bool(fields.contains_key(key)))
        }
        (Method::Length, Value::Str(s), []) => Ok(Value::Int(s.chars().count() as i64)),
        (Method::Length, Value::List(items), []) | (Method::Length, Value::Batch(items), []) => {
            Ok(Value::Int(items.len() as i64))
        }
        (_, Value::Null, _) => Err(EvalError::NullPayload),
        (method, target, args) => {
            Err(EvalError::type_mismatch(method.name(), target, args.first()))
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Equals => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEquals => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEquals
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEquals => {
            let ordering = compare(left, right)
                .ok_or_else(|| EvalError::type_mismatch(op.symbol(), left, Some(right)))?;
            let result = match op {
                BinaryOp::LessThan => ordering == Ordering::Less,
                BinaryOp::LessThanOrEquals => ordering != Ordering::Greater,
                BinaryOp::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Plus => match (left, right) {
            (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, plain(b)))),
            (a, Value::Str(b)) => Ok(Value::Str(format!("{}{}", plain(a), b))),
            _ => arithmetic(op, left, right),
        },
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Plus => a.checked_add(b),
                BinaryOp::Minus => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
                    return Err(EvalError::DivisionByZero)
                }
                BinaryOp::Divide => a.checked_div(b),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => None,
            };
            result.map(Value::Int).ok_or(EvalError::Overflow)
        }
        _ => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(EvalError::type_mismatch(op.symbol(), left, Some(right))),
            };
            let result = match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => {
                    return Err(EvalError::DivisionByZero)
                }
                BinaryOp::Divide => a / b,
                BinaryOp::Modulo => a % b,
                _ => return Err(EvalError::type_mismatch(op.symbol(), left, Some(right))),
            };
            Ok(Value::Float(result))
        }
    }
}

/// Equality with numeric widening between ints and floats
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            left.as_f64() == right.as_f64()
        }
        (Value::Float(a), Value::Float(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}
