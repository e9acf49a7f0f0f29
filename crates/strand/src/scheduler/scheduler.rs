//! Scheduler — owns the ready queue, the worker pool, and the lifecycle
//!
//! One mutex protects all scheduling state: the ready queue, every task's
//! state transitions, the per-worker current slots, joiner links, the
//! running flag, the id counter, and the live-task registry. Two condition
//! variables pair with it: `work_ready` wakes idle workers (one signal per
//! enqueue, broadcast only on stop) and `all_done` wakes `wait_all` callers
//! when the registry drains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::scheduler::queue::ReadyQueue;
use crate::scheduler::task::{self, EntryFn, Task, TaskHandle, TaskId, TaskState};
use crate::scheduler::worker::Worker;
use crate::{Error, Result, DEFAULT_STACK_SIZE};

/// Maximum number of worker threads.
pub const MAX_WORKERS: usize = 64;

/// Scheduling state protected by the scheduler lock.
pub(crate) struct SchedState {
    /// FIFO of runnable tasks.
    pub queue: ReadyQueue,
    /// Per-worker currently-running task, indexed by worker id.
    pub current: Vec<Option<Arc<Task>>>,
    /// Whether workers should keep dispatching.
    pub running: bool,
    /// Next task id to hand out.
    pub next_id: u64,
    /// Every spawned task that has not yet finished.
    pub live: FxHashMap<TaskId, Arc<Task>>,
}

/// State shared between the scheduler handle and its workers.
pub(crate) struct Shared {
    /// All scheduling state, under the one scheduler lock.
    pub state: Mutex<SchedState>,
    /// Signalled once per enqueue; broadcast on stop.
    pub work_ready: Condvar,
    /// Signalled when the last live task finishes.
    pub all_done: Condvar,
    /// Number of workers in the pool.
    pub worker_count: usize,
}

impl Shared {
    pub fn new(worker_count: usize) -> Self {
        Self {
            state: Mutex::new(SchedState {
                queue: ReadyQueue::new(),
                current: vec![None; worker_count],
                running: false,
                next_id: 1,
                live: FxHashMap::default(),
            }),
            work_ready: Condvar::new(),
            all_done: Condvar::new(),
            worker_count,
        }
    }

    /// Hand out the next task id.
    pub fn allocate_task_id(&self) -> TaskId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        TaskId::new(id)
    }

    /// Register a new task, transition it New→Ready, enqueue it, and signal
    /// one worker.
    pub fn add_task(&self, task: Arc<Task>) {
        debug_assert_eq!(task.state(), TaskState::New);
        let mut state = self.state.lock();
        task.set_state(TaskState::Ready);
        state.live.insert(task.id(), Arc::clone(&task));
        state.queue.push(task);
        drop(state);
        self.work_ready.notify_one();
    }
}

/// Cooperative M:N task scheduler.
///
/// Owns a fixed pool of OS worker threads and a FIFO ready queue. Tasks may
/// be spawned before [`start`] and keep their queue position; after
/// [`stop`], queued tasks remain valid but are never dispatched again.
///
/// [`start`]: Scheduler::start
/// [`stop`]: Scheduler::stop
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
}

impl Scheduler {
    /// Create a scheduler with `worker_count` OS worker threads.
    ///
    /// Fails with [`Error::InvalidWorkerCount`] unless
    /// `1 <= worker_count <= MAX_WORKERS`.
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 || worker_count > MAX_WORKERS {
            return Err(Error::InvalidWorkerCount(worker_count));
        }
        Ok(Self {
            shared: Arc::new(Shared::new(worker_count)),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Create a scheduler with one worker per available CPU core, clamped
    /// to `MAX_WORKERS`.
    pub fn with_cpu_workers() -> Result<Self> {
        Self::new(num_cpus::get().clamp(1, MAX_WORKERS))
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Whether the scheduler is currently running.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Start the worker threads. Idempotent when already running.
    ///
    /// If an OS thread fails to spawn, the scheduler rolls back to the
    /// stopped state and returns [`Error::WorkerSpawn`].
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let mut workers = self.workers.lock();
        for id in 0..self.shared.worker_count {
            match Worker::spawn(id, Arc::clone(&self.shared)) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    self.shared.state.lock().running = false;
                    self.shared.work_ready.notify_all();
                    for worker in workers.drain(..) {
                        worker.join();
                    }
                    return Err(Error::WorkerSpawn(e));
                }
            }
        }
        tracing::debug!(workers = self.shared.worker_count, "scheduler started");
        Ok(())
    }

    /// Stop the scheduler and join all worker threads. Idempotent when not
    /// running.
    ///
    /// Workers drain after their current task next suspends; in-flight
    /// tasks are not cancelled, and a task that never suspends prevents
    /// shutdown. After `stop` returns no task is ever dispatched again, but
    /// tasks left in the queue remain valid. Must be called from outside
    /// any task.
    pub fn stop(&self) {
        debug_assert!(
            task::current_task().is_none(),
            "stop must not be called from inside a task"
        );
        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.shared.work_ready.notify_all();

        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            worker.join();
        }
        let state = self.shared.state.lock();
        tracing::debug!(
            queued = state.queue.len(),
            live = state.live.len(),
            "scheduler stopped"
        );
    }

    /// Spawn a task with the default stack size.
    ///
    /// The task is enqueued immediately and runs once the scheduler is
    /// started. Safe to call from outside any task and from within tasks.
    pub fn spawn<F>(&self, entry: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with_stack_size(entry, DEFAULT_STACK_SIZE)
    }

    /// Spawn a task with a caller-chosen stack size in bytes. A size of
    /// zero selects [`DEFAULT_STACK_SIZE`].
    pub fn spawn_with_stack_size<F>(&self, entry: F, stack_size: usize) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            stack_size
        };
        let entry: EntryFn = Box::new(entry);
        let task = Task::new(entry, &self.shared, stack_size)?;
        tracing::trace!(task = task.id().as_u64(), "task spawned");
        self.shared.add_task(Arc::clone(&task));
        Ok(TaskHandle::new(task))
    }

    /// Block until every spawned task has finished, or until `timeout`
    /// elapses. Returns true if all tasks finished.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.live.is_empty() {
            if self
                .shared
                .all_done
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.live.is_empty();
            }
        }
        true
    }

    /// Number of spawned tasks that have not yet finished.
    pub fn task_count(&self) -> usize {
        self.shared.state.lock().live.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
