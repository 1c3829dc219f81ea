//! Concurrency primitives used by the orchestrator.

mod task_group;
mod throttle;

pub use task_group::{run_all, TaskGroup};
pub use throttle::Throttle;
