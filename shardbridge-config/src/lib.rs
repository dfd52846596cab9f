//! Configuration management for ShardBridge

pub mod config;
pub mod loader;
pub mod validator;

/// Re-export main types
pub use config::*;
pub use loader::*;
pub use validator::*;
