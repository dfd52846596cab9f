//! Sharding rules

use std::fmt;

use shardbridge_core::{namespace_of, Result, RoutingFact, ShardBridgeError, ShardId};

use crate::expression::Expression;
use crate::functions::FunctionRegistry;

/// The four fixed-precedence rule tiers, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleTier {
    StatementExactWithExpression,
    StatementExact,
    NamespacePrefixWithExpression,
    NamespacePrefix,
}

impl RuleTier {
    /// Every tier, highest precedence first
    pub const ORDER: [RuleTier; 4] = [
        RuleTier::StatementExactWithExpression,
        RuleTier::StatementExact,
        RuleTier::NamespacePrefixWithExpression,
        RuleTier::NamespacePrefix,
    ];

    /// Position of the tier in `ORDER`
    pub fn index(&self) -> usize {
        match self {
            RuleTier::StatementExactWithExpression => 0,
            RuleTier::StatementExact => 1,
            RuleTier::NamespacePrefixWithExpression => 2,
            RuleTier::NamespacePrefix => 3,
        }
    }
}

impl fmt::Display for RuleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleTier::StatementExactWithExpression => "statement+expression",
            RuleTier::StatementExact => "statement",
            RuleTier::NamespacePrefixWithExpression => "namespace+expression",
            RuleTier::NamespacePrefix => "namespace",
        };
        write!(f, "{}", name)
    }
}

/// A predicate over routing facts plus the shards it yields when matched
#[derive(Debug, Clone)]
pub enum Rule {
    StatementExact {
        pattern: String,
        shards: Vec<ShardId>,
    },
    StatementExactWithExpression {
        pattern: String,
        shards: Vec<ShardId>,
        expression: Expression,
    },
    NamespacePrefix {
        pattern: String,
        shards: Vec<ShardId>,
    },
    NamespacePrefixWithExpression {
        pattern: String,
        shards: Vec<ShardId>,
        expression: Expression,
    },
}

impl Rule {
    /// Rule matching exactly one statement identity
    pub fn statement<P: Into<String>>(pattern: P, shards: Vec<ShardId>) -> Result<Self> {
        let (pattern, shards) = checked(pattern.into(), shards)?;
        Ok(Rule::StatementExact { pattern, shards })
    }

    /// Rule matching one statement identity when `expression` holds
    pub fn statement_with_expression<P: Into<String>>(
        pattern: P,
        shards: Vec<ShardId>,
        expression: &str,
        functions: &FunctionRegistry,
    ) -> Result<Self> {
        let (pattern, shards) = checked(pattern.into(), shards)?;
        let expression = compile(&pattern, expression, functions)?;
        Ok(Rule::StatementExactWithExpression {
            pattern,
            shards,
            expression,
        })
    }

    /// Rule matching every statement of a namespace
    pub fn namespace<P: Into<String>>(pattern: P, shards: Vec<ShardId>) -> Result<Self> {
        let (pattern, shards) = checked(pattern.into(), shards)?;
        Ok(Rule::NamespacePrefix { pattern, shards })
    }

    /// Rule matching every statement of a namespace when `expression` holds
    pub fn namespace_with_expression<P: Into<String>>(
        pattern: P,
        shards: Vec<ShardId>,
        expression: &str,
        functions: &FunctionRegistry,
    ) -> Result<Self> {
        let (pattern, shards) = checked(pattern.into(), shards)?;
        let expression = compile(&pattern, expression, functions)?;
        Ok(Rule::NamespacePrefixWithExpression {
            pattern,
            shards,
            expression,
        })
    }

    pub fn matches(&self, fact: &RoutingFact) -> bool {
        match self {
            Rule::StatementExact { pattern, .. } => fact.action_id() == pattern,
            Rule::StatementExactWithExpression {
                pattern,
                expression,
                ..
            } => fact.action_id() == pattern && expression.matches(fact.payload()),
            Rule::NamespacePrefix { pattern, .. } => fact.namespace() == pattern,
            Rule::NamespacePrefixWithExpression {
                pattern,
                expression,
                ..
            } => fact.namespace() == pattern && expression.matches(fact.payload()),
        }
    }

    /// Target shards in declaration order
    pub fn targets(&self) -> &[ShardId] {
        match self {
            Rule::StatementExact { shards, .. }
            | Rule::StatementExactWithExpression { shards, .. }
            | Rule::NamespacePrefix { shards, .. }
            | Rule::NamespacePrefixWithExpression { shards, .. } => shards,
        }
    }

    pub fn tier(&self) -> RuleTier {
        match self {
            Rule::StatementExact { .. } => RuleTier::StatementExact,
            Rule::StatementExactWithExpression { .. } => RuleTier::StatementExactWithExpression,
            Rule::NamespacePrefix { .. } => RuleTier::NamespacePrefix,
            Rule::NamespacePrefixWithExpression { .. } => RuleTier::NamespacePrefixWithExpression,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Rule::StatementExact { pattern, .. }
            | Rule::StatementExactWithExpression { pattern, .. }
            | Rule::NamespacePrefix { pattern, .. }
            | Rule::NamespacePrefixWithExpression { pattern, .. } => pattern,
        }
    }

    pub fn expression(&self) -> Option<&Expression> {
        match self {
            Rule::StatementExactWithExpression { expression, .. }
            | Rule::NamespacePrefixWithExpression { expression, .. } => Some(expression),
            _ => None,
        }
    }

    /// Namespace the rule is filed under inside a router
    pub fn namespace_key(&self) -> &str {
        match self {
            Rule::StatementExact { pattern, .. }
            | Rule::StatementExactWithExpression { pattern, .. } => namespace_of(pattern),
            Rule::NamespacePrefix { pattern, .. }
            | Rule::NamespacePrefixWithExpression { pattern, .. } => pattern,
        }
    }

    /// Two rules in one tier that would compete for the same facts
    pub fn conflicts_with(&self, other: &Rule) -> bool {
        self.tier() == other.tier()
            && self.pattern() == other.pattern()
            && self.expression().map(Expression::source)
                == other.expression().map(Expression::source)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shards: Vec<&str> = self.targets().iter().map(|s| s.as_str()).collect();
        match self.expression() {
            Some(expression) => write!(
                f,
                "{} '{}' when [{}] -> [{}]",
                self.tier(),
                self.pattern(),
                expression,
                shards.join(", ")
            ),
            None => write!(f, "{} '{}' -> [{}]", self.tier(), self.pattern(), shards.join(", ")),
        }
    }
}

fn checked(pattern: String, shards: Vec<ShardId>) -> Result<(String, Vec<ShardId>)> {
    let pattern = pattern.trim().to_string();
    if pattern.is_empty() {
        return Err(ShardBridgeError::config("Rule pattern cannot be empty"));
    }
    if shards.is_empty() {
        return Err(ShardBridgeError::config(format!(
            "Rule '{}' must target at least one shard",
            pattern
        )));
    }
    if let Some(blank) = shards.iter().find(|s| s.as_str().trim().is_empty()) {
        return Err(ShardBridgeError::config(format!(
            "Rule '{}' targets a blank shard identity '{}'",
            pattern, blank
        )));
    }
    Ok((pattern, shards))
}

fn compile(pattern: &str, expression: &str, functions: &FunctionRegistry) -> Result<Expression> {
    if expression.trim().is_empty() {
        return Err(ShardBridgeError::config(format!(
            "Rule '{}' has an empty sharding expression",
            pattern
        )));
    }
    Expression::compile(expression, functions)
}
