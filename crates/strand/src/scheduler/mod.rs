//! Task scheduler — cooperative M:N scheduling
//!
//! Many stackful tasks are multiplexed onto a fixed pool of OS worker
//! threads. A single FIFO ready queue hands tasks to whichever worker is
//! free; a task keeps its worker until it yields, joins, sleeps, or
//! finishes, then control returns to that worker's dispatch loop.

pub(crate) mod context;
pub(crate) mod queue;
#[allow(clippy::module_inception)]
pub(crate) mod scheduler;
pub(crate) mod task;
pub(crate) mod worker;

pub use scheduler::{Scheduler, MAX_WORKERS};
pub use task::{TaskHandle, TaskId, TaskState};

pub use context::DEFAULT_STACK_SIZE;
