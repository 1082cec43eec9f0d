//! Batch orchestration: a bounded worker pool and the batch entry points
//! that fan queries out over it.

pub mod cancel;
pub mod orchestrator;
pub mod pool;

pub use cancel::CancelToken;
pub use orchestrator::BatchOrchestrator;
pub use pool::{PoolConfig, PoolError, PoolHandle, PoolStats, WorkerPool};
