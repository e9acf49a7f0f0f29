//! Worker threads — the per-OS-thread dispatch loop
//!
//! Each worker pops the head of the ready queue, installs the task as its
//! current task, and switches into it. When the task suspends, control
//! returns here on the worker's own dispatch context; the task's context is
//! fully saved by then, so this side performs the state transition, the
//! enqueue, and the signal. A task that enqueued itself before the switch
//! could be resumed by another worker mid-save.

use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::scheduler::context::{SuspendReason, Switch};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::task::{self, Task, TaskState};

thread_local! {
    static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The stable id of the worker running this OS thread, if any.
pub(crate) fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(|id| id.get())
}

/// Handle to one worker OS thread.
pub(crate) struct Worker {
    id: usize,
    handle: thread::JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker thread for slot `id`.
    pub fn spawn(id: usize, shared: Arc<Shared>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("strand-worker-{id}"))
            .spawn(move || run(id, shared))?;
        Ok(Self { id, handle })
    }

    /// Wait for the worker thread to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!(worker = self.id, "worker thread panicked");
        }
    }
}

/// Worker main loop.
fn run(id: usize, shared: Arc<Shared>) {
    WORKER_ID.with(|slot| slot.set(Some(id)));
    tracing::trace!(worker = id, "worker started");

    loop {
        let mut state = shared.state.lock();
        while state.running && state.queue.is_empty() {
            shared.work_ready.wait(&mut state);
        }
        if !state.running {
            break;
        }
        let Some(task) = state.queue.pop() else {
            continue;
        };
        debug_assert_eq!(task.state(), TaskState::Ready);
        task.set_state(TaskState::Running);
        state.current[id] = Some(Arc::clone(&task));
        drop(state);

        dispatch(id, &shared, task);
    }

    tracing::trace!(worker = id, "worker exiting");
}

/// Run one slice of `task`: switch into it, then act on how it came back.
fn dispatch(id: usize, shared: &Shared, task: Arc<Task>) {
    tracing::trace!(worker = id, task = task.id().as_u64(), "dispatch");
    task::set_current_task(Some(Arc::clone(&task)));
    let switch = {
        let mut context = task.context().lock();
        context.resume()
    };
    task::set_current_task(None);

    match switch {
        Switch::Finished => finish(id, shared, &task),
        Switch::Suspended(SuspendReason::Yielded) => requeue(id, shared, &task),
        Switch::Suspended(SuspendReason::Join(target)) => block_on(id, shared, &task, &target),
        Switch::Suspended(SuspendReason::Sleep { wake_at }) => {
            sleep_then_requeue(id, shared, &task, wake_at)
        }
    }
}

/// Final transition: mark the task Finished, wake its joiner, and drop it
/// from the live registry, all in one critical section.
fn finish(id: usize, shared: &Shared, task: &Arc<Task>) {
    let mut notify_worker = false;

    let mut state = shared.state.lock();
    task.set_state(TaskState::Finished);
    if let Some(joiner) = task.joiner().lock().take() {
        debug_assert_eq!(joiner.state(), TaskState::Blocked);
        joiner.set_state(TaskState::Ready);
        state.queue.push(joiner);
        notify_worker = true;
    }
    state.current[id] = None;
    state.live.remove(&task.id());
    let drained = state.live.is_empty();
    drop(state);

    if notify_worker {
        shared.work_ready.notify_one();
    }
    if drained {
        shared.all_done.notify_all();
    }
    tracing::trace!(worker = id, task = task.id().as_u64(), "task finished");
}

/// Voluntary yield: back to the tail of the ready queue.
fn requeue(id: usize, shared: &Shared, task: &Arc<Task>) {
    let mut state = shared.state.lock();
    if task.state() != TaskState::Finished {
        task.set_state(TaskState::Ready);
        state.queue.push(Arc::clone(task));
    }
    state.current[id] = None;
    drop(state);
    shared.work_ready.notify_one();
}

/// Join: block the task and install it as the target's joiner, unless the
/// target finished between the task-side check and this lock.
fn block_on(id: usize, shared: &Shared, task: &Arc<Task>, target: &Arc<Task>) {
    let mut state = shared.state.lock();
    if target.state() == TaskState::Finished {
        task.set_state(TaskState::Ready);
        state.queue.push(Arc::clone(task));
        state.current[id] = None;
        drop(state);
        shared.work_ready.notify_one();
        return;
    }

    let mut joiner = target.joiner().lock();
    debug_assert!(joiner.is_none(), "at most one joiner per task");
    *joiner = Some(Arc::clone(task));
    drop(joiner);
    task.set_state(TaskState::Blocked);
    state.current[id] = None;
}

/// Sleep: block the task, wait off the scheduler lock on this worker, then
/// re-enqueue.
fn sleep_then_requeue(id: usize, shared: &Shared, task: &Arc<Task>, wake_at: Instant) {
    {
        let mut state = shared.state.lock();
        task.set_state(TaskState::Blocked);
        state.current[id] = None;
        drop(state);
    }

    let now = Instant::now();
    if wake_at > now {
        thread::sleep(wake_at - now);
    }

    let mut state = shared.state.lock();
    task.set_state(TaskState::Ready);
    state.queue.push(Arc::clone(task));
    drop(state);
    shared.work_ready.notify_one();
}
