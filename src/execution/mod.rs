//! Worker pools and concurrent fan-out

pub mod pool;
pub mod processor;

pub use pool::{PoolConfig, WorkerPool, DEFAULT_KEEP_ALIVE};
pub use processor::{execute_on, Action, ConcurrentRequest, ConcurrentRequestProcessor};
