//! Abstract syntax tree for sharding expressions

use shardbridge_core::Value;

use crate::functions::BoundFunction;

/// Expression node
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// `$ROOT`, the whole payload
    Root,
    /// Bare identifier, a field of the payload record
    Field(String),
    /// `target.name`
    Member { target: Box<Expr>, name: String },
    /// Call of a built-in method, `target.startsWith("A")` or bare `startsWith("A")`
    Method {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
    /// Call of a bound function, `mod(id)` or `mod.apply(id)`
    Call { function: BoundFunction, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEquals => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEquals => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

/// Built-in methods available on values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    StartsWith,
    EndsWith,
    Contains,
    Length,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "startsWith" => Some(Method::StartsWith),
            "endsWith" => Some(Method::EndsWith),
            "contains" => Some(Method::Contains),
            "length" | "size" => Some(Method::Length),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
            Method::Contains => "contains",
            Method::Length => "length",
        }
    }

    /// Number of arguments the method takes
    pub fn arity(&self) -> usize {
        match self {
            Method::Length => 0,
            _ => 1,
        }
    }
}
