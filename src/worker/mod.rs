//! Worker execution — handler contract, registry, and the claim/execute
//! pool.

pub mod handler;
pub mod pool;

pub use handler::{HandlerRegistry, OperationHandler};
pub use pool::WorkerPool;
