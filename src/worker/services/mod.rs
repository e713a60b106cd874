//! Event handling, the consume loop and the worker pool.

mod backoff;
mod consume;
mod handler;
mod pool;

pub use backoff::{ExponentialBackoff, backoff_ceiling, sample_delay};
pub use consume::{ConsumeLoop, LoopSettings};
pub use handler::{HandleError, HandleOutcome, TaskHandler};
pub use pool::WorkerPool;
