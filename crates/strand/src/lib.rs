//! Lightweight M:N cooperative task runtime
//!
//! This crate multiplexes many cooperative, stackful tasks onto a small pool
//! of OS worker threads. Tasks are cheap: each one owns a private stack
//! (64 KiB by default) and runs until it voluntarily yields, joins another
//! task, sleeps, or finishes. There is no preemption; tasks are trusted
//! cooperating participants in one process.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let scheduler = strand::Scheduler::new(2)?;
//! scheduler.start()?;
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//! let task = scheduler.spawn(move || {
//!     log2.lock().unwrap().push("hello");
//!     strand::yield_now();
//!     log2.lock().unwrap().push("again");
//! })?;
//!
//! assert!(scheduler.wait_all(Duration::from_secs(5)));
//! assert!(task.is_finished());
//! assert_eq!(log.lock().unwrap().len(), 2);
//! # Ok::<(), strand::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod scheduler;

pub use scheduler::{Scheduler, TaskHandle, TaskId, TaskState, DEFAULT_STACK_SIZE, MAX_WORKERS};

use std::time::{Duration, Instant};

use scheduler::context::SuspendReason;
use scheduler::task;

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Worker count outside `1..=MAX_WORKERS`
    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(usize),

    /// Task stack allocation failed
    #[error("failed to allocate task stack: {0}")]
    StackAllocation(#[source] std::io::Error),

    /// OS worker thread creation failed
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Runtime result
pub type Result<T> = std::result::Result<T, Error>;

/// Yield the current task back to the scheduler.
///
/// The task is re-enqueued at the tail of the ready queue and resumes once a
/// worker picks it up again, not necessarily the same one. Outside any task
/// this is a no-op.
pub fn yield_now() {
    task::suspend_current(SuspendReason::Yielded);
}

/// Sleep for at least `duration`.
///
/// Inside a task this is a normal suspension point: the task blocks, its
/// worker performs the wait, and the task resumes only after the duration has
/// elapsed *and* it has been re-dispatched. There is no hard real-time bound.
/// Outside any task this delegates to [`std::thread::sleep`].
pub fn sleep(duration: Duration) {
    let wake_at = Instant::now() + duration;
    if !task::suspend_current(SuspendReason::Sleep { wake_at }) {
        std::thread::sleep(duration);
    }
}

/// The task currently executing on this OS thread, or `None` when called
/// from outside any task (e.g. application startup code).
pub fn current() -> Option<TaskHandle> {
    task::current_task().map(TaskHandle::new)
}
