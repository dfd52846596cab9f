//! Sharding rules, expression language and routing for ShardBridge

pub mod cache;
pub mod expression;
pub mod functions;
pub mod loader;
pub mod router;
pub mod rule;

/// Re-export main types
pub use cache::*;
pub use expression::Expression;
pub use functions::*;
pub use loader::*;
pub use router::*;
pub use rule::*;
