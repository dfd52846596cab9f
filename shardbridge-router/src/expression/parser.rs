//! Recursive descent parser for sharding expressions
//!
//! Precedence, loosest first: `or`, `and`, equality, comparison, additive,
//! multiplicative, unary, member access and calls.

use shardbridge_core::Value;

use super::ast::{BinaryOp, Expr, Method, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::CompileError;
use crate::functions::FunctionRegistry;

/// Expression parser bound to the functions visible at compile time
pub struct ExpressionParser<'a> {
    tokens: Vec<Spanned>,
    position: usize,
    functions: &'a FunctionRegistry,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            tokens: Vec::new(),
            position: 0,
            functions,
        }
    }

    /// Parse a complete expression
    pub fn parse(&mut self, source: &str) -> Result<Expr, CompileError> {
        self.tokens = tokenize(source)?;
        self.position = 0;

        if self.peek() == &Token::Eof {
            return Err(CompileError::Empty);
        }

        let expr = self.parse_or()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::Equals => BinaryOp::Equals,
                Token::NotEquals => BinaryOp::NotEquals,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::LessThan => BinaryOp::LessThan,
                Token::LessThanOrEquals => BinaryOp::LessThanOrEquals,
                Token::GreaterThan => BinaryOp::GreaterThan,
                Token::GreaterThanOrEquals => BinaryOp::GreaterThanOrEquals,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Plus,
                Token::Minus => BinaryOp::Minus,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Multiply => BinaryOp::Multiply,
                Token::Divide => BinaryOp::Divide,
                Token::Modulo => BinaryOp::Modulo,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;

        // fold negative literals so that `-5` stays a constant
        if op == UnaryOp::Negate {
            match operand {
                Expr::Literal(Value::Int(i)) => return Ok(Expr::Literal(Value::Int(-i))),
                Expr::Literal(Value::Float(f)) => return Ok(Expr::Literal(Value::Float(-f))),
                _ => {}
            }
        }

        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;

        while self.eat(&Token::Dot) {
            let name = self.expect_identifier()?;

            if self.peek() != &Token::LeftParen {
                expr = Expr::Member {
                    target: Box::new(expr),
                    name,
                };
                continue;
            }

            let args = self.parse_arguments()?;
            expr = match (expr, Method::from_name(&name)) {
                (Expr::Field(function), _)
                    if name == "apply" && self.functions.contains(&function) =>
                {
                    self.bound_call(&function, args)?
                }
                (target, Some(method)) => method_call(target, method, args)?,
                (_, None) => return Err(CompileError::UnknownMethod(name)),
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek().clone();
        match token {
            Token::IntegerLit(i) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(i)))
            }
            Token::FloatLit(f) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(f)))
            }
            Token::StringLit(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::Root => {
                self.advance();
                Ok(Expr::Root)
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                self.advance();
                if self.peek() != &Token::LeftParen {
                    return Ok(Expr::Field(name));
                }
                let args = self.parse_arguments()?;
                if self.functions.contains(&name) {
                    self.bound_call(&name, args)
                } else if let Some(method) = Method::from_name(&name) {
                    method_call(Expr::Root, method, args)
                } else {
                    Err(CompileError::UnknownFunction(name))
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(Token::LeftParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RightParen)?;
            return Ok(args);
        }
    }

    fn bound_call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, CompileError> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;
        Ok(Expr::Call { function, args })
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|spanned| &spanned.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.position).map(|spanned| spanned.offset).unwrap_or(0)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(CompileError::ExpectedToken {
                expected: expected.describe(),
                found: self.peek().describe(),
                offset: self.offset(),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String, CompileError> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(CompileError::ExpectedToken {
                expected: "identifier".to_string(),
                found: other.describe(),
                offset: self.offset(),
            }),
        }
    }

    fn unexpected(&self) -> CompileError {
        match self.peek() {
            Token::Eof => CompileError::UnexpectedEnd,
            other => CompileError::UnexpectedToken {
                found: other.describe(),
                offset: self.offset(),
            },
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn method_call(target: Expr, method: Method, args: Vec<Expr>) -> Result<Expr, CompileError> {
    if args.len() != method.arity() {
        return Err(CompileError::Arity {
            name: method.name().to_string(),
            expected: method.arity(),
            found: args.len(),
        });
    }
    Ok(Expr::Method {
        target: Box::new(target),
        method,
        args,
    })
}
