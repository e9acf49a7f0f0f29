//! Execution contexts — stack allocation and context switching
//!
//! Each task owns an [`ExecContext`]: a heap-allocated stack plus the saved
//! register state needed to switch into and out of it. A worker switches
//! into a task with [`ExecContext::resume`]; the task switches back by
//! suspending with a [`SuspendReason`], which the worker receives on its own
//! dispatch context and acts on. The very first resume enters the entry
//! trampoline installed at construction; when that returns, the context
//! reports [`Switch::Finished`] and can never be resumed again.

use std::sync::Arc;
use std::time::Instant;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::scheduler::task::Task;
use crate::{Error, Result};

/// Default task stack size: 64 KiB.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Why a task suspended, handed to the worker across the context switch.
///
/// The suspending task never re-enqueues itself: its context is not fully
/// saved until the switch completes, so the worker — back on its dispatch
/// context — performs the state transition, enqueue, and signal.
pub(crate) enum SuspendReason {
    /// Voluntary yield; re-enqueue at the tail of the ready queue.
    Yielded,
    /// Waiting for another task to finish; becomes that task's joiner.
    Join(Arc<Task>),
    /// Sleeping; the worker waits until `wake_at`, then re-enqueues.
    Sleep {
        /// When to wake up.
        wake_at: Instant,
    },
}

/// Outcome of resuming a task's context.
pub(crate) enum Switch {
    /// The task suspended; its context is saved and may be resumed again.
    Suspended(SuspendReason),
    /// The task's entry returned; the context is finished for good.
    Finished,
}

/// The suspend side of the switch, as seen from inside a task.
pub(crate) type TaskYielder = Yielder<(), SuspendReason>;

/// A task's execution context: owned stack + saved register state.
pub(crate) struct ExecContext {
    coroutine: Coroutine<(), SuspendReason, (), DefaultStack>,
}

// SAFETY: the closure passed to `new` is required to be Send, and the
// scheduler resumes a context from at most one worker at a time (a task is
// either Running on exactly one worker or suspended with its context
// frozen).
unsafe impl Send for ExecContext {}

impl ExecContext {
    /// Allocate a stack of `stack_size` bytes and prepare it so that the
    /// first resume enters `body` on the new stack.
    pub fn new<F>(stack_size: usize, body: F) -> Result<Self>
    where
        F: FnOnce(&TaskYielder) + Send + 'static,
    {
        let stack = DefaultStack::new(stack_size).map_err(Error::StackAllocation)?;
        let coroutine = Coroutine::with_stack(stack, move |yielder, _| body(yielder));
        Ok(Self { coroutine })
    }

    /// Switch from the caller's context into the task.
    ///
    /// Returns when the task suspends or finishes. Must not be called again
    /// after [`Switch::Finished`].
    pub fn resume(&mut self) -> Switch {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(reason) => Switch::Suspended(reason),
            CoroutineResult::Return(()) => Switch::Finished,
        }
    }
}
