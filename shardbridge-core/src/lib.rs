//! Core types and error taxonomy for the ShardBridge sharding middleware

pub mod error;
pub mod types;

pub use error::*;
/// Re-export commonly used types
pub use types::*;
