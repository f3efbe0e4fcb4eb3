//! A Tokio-based bounded worker pool for fan-out processing, with completion
//! accounting and cooperative, pool-wide cancellation.

mod config;
mod counter;
mod error;
mod pool;
mod task;
mod worker;

pub use config::{default_worker_count, PoolConfig, MAX_QUEUE_SLOTS, QueueCapacity, ResolvedConfig};
pub use error::PoolError;
pub use pool::{StopHandle, WaitOutcome, WorkerPool};
pub use task::{HandlerFuture, WorkItem};
pub use worker::WorkerState;
