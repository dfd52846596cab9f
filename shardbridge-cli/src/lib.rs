//! ShardBridge CLI library

pub mod commands;

pub use commands::*;
