//! Task structure and lifecycle
//!
//! A [`Task`] is one unit of cooperative execution: an owned stack with
//! saved register state, a state machine, the entry closure, and an
//! optional joiner back-link. Tasks are shared as `Arc<Task>` between the
//! ready queue, the live-task registry, user handles, the running worker,
//! and joiner links; the stack is released when the last reference drops,
//! which structurally cannot happen while the task is Running or Blocked.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::scheduler::context::{ExecContext, SuspendReason, TaskYielder};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::worker;
use crate::Result;

/// Unique identifier for a task, assigned by the scheduler at creation.
/// Ids increase monotonically and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        TaskId(raw)
    }

    /// The numeric id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// State of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Created but not yet enqueued.
    New = 0,
    /// In the ready queue, waiting for a worker.
    Ready = 1,
    /// Executing on exactly one worker.
    Running = 2,
    /// Suspended on join or sleep; not in the ready queue.
    Blocked = 3,
    /// Entry function returned; never scheduled again.
    Finished = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::New,
            1 => TaskState::Ready,
            2 => TaskState::Running,
            3 => TaskState::Blocked,
            _ => TaskState::Finished,
        }
    }
}

/// The boxed entry closure of a task.
pub(crate) type EntryFn = Box<dyn FnOnce() + Send + 'static>;

/// A lightweight cooperative task.
pub(crate) struct Task {
    /// Unique identifier.
    id: TaskId,

    /// Current state. Written only under the scheduler lock (except the
    /// New→Ready transition during spawn); read lock-free.
    state: AtomicU8,

    /// Execution context. Locked by the worker for the duration of each
    /// running slice; uncontended by construction.
    context: Mutex<ExecContext>,

    /// Suspend handle, installed by the trampoline while the task body is
    /// live on its own stack. Null before first resume and after finish.
    yielder: AtomicPtr<TaskYielder>,

    /// The task blocked in join on this task, at most one. Protected by the
    /// scheduler lock (the inner mutex only orders the field itself).
    joiner: Mutex<Option<Arc<Task>>>,

    /// Non-owning back-reference to the scheduler.
    scheduler: Weak<Shared>,

    /// Whether the entry function panicked.
    panicked: AtomicBool,

    /// Panic message, if the entry function panicked.
    panic_message: Mutex<Option<String>>,
}

impl Task {
    /// Create a task: allocate its stack, prepare the context so the first
    /// resume enters the trampoline, and assign a unique id under the
    /// scheduler lock. The task starts in state New.
    pub fn new(entry: EntryFn, scheduler: &Arc<Shared>, stack_size: usize) -> Result<Arc<Self>> {
        let context = ExecContext::new(stack_size, move |yielder| trampoline(yielder, entry))?;
        let id = scheduler.allocate_task_id();
        Ok(Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::New as u8),
            context: Mutex::new(context),
            yielder: AtomicPtr::new(ptr::null_mut()),
            joiner: Mutex::new(None),
            scheduler: Arc::downgrade(scheduler),
            panicked: AtomicBool::new(false),
            panic_message: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition the task's state. Callers hold the scheduler lock, except
    /// for the New→Ready transition during spawn.
    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn context(&self) -> &Mutex<ExecContext> {
        &self.context
    }

    pub fn joiner(&self) -> &Mutex<Option<Arc<Task>>> {
        &self.joiner
    }

    pub fn scheduler(&self) -> Option<Arc<Shared>> {
        self.scheduler.upgrade()
    }

    pub fn panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    pub fn panic_message(&self) -> Option<String> {
        self.panic_message.lock().clone()
    }

    fn yielder_ptr(&self) -> *mut TaskYielder {
        self.yielder.load(Ordering::Acquire)
    }

    fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!(task = self.id.as_u64(), %message, "task panicked");
        *self.panic_message.lock() = Some(message);
        self.panicked.store(true, Ordering::Release);
    }
}

/// First-resume entry point for every task.
///
/// Publishes the suspend handle, runs the user entry, and returns through
/// the context — the final switch that hands control back to the worker
/// without re-enqueueing. The FINISHED transition and joiner wakeup happen
/// on the worker side of that switch.
fn trampoline(yielder: &TaskYielder, entry: EntryFn) {
    {
        let Some(task) = current_task() else { return };
        task.yielder
            .store(yielder as *const TaskYielder as *mut TaskYielder, Ordering::Release);
        // the Arc must not stay on this stack across entry's suspensions
    }

    let result = panic::catch_unwind(AssertUnwindSafe(entry));

    // Re-read the current task rather than holding it across entry. If this
    // stack is being torn down by a drop of the suspended context, the
    // thread-local no longer names this task; the unwind must continue.
    let me = current_task().filter(|t| ptr::eq(t.yielder_ptr(), yielder));
    match (result, me) {
        (Ok(()), Some(task)) => {
            task.yielder.store(ptr::null_mut(), Ordering::Release);
        }
        (Err(payload), Some(task)) => {
            task.yielder.store(ptr::null_mut(), Ordering::Release);
            task.record_panic(payload);
        }
        (Err(payload), None) => panic::resume_unwind(payload),
        (Ok(()), None) => {}
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// The task currently executing on this OS thread, if any.
pub(crate) fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|current| current.borrow().clone())
}

/// Install or clear this OS thread's current task. Worker-internal: set at
/// dispatch, cleared when the task switches back.
pub(crate) fn set_current_task(task: Option<Arc<Task>>) {
    CURRENT_TASK.with(|current| *current.borrow_mut() = task);
}

/// Suspend the current task with `reason`, switching back to the dispatch
/// context of the worker running it. Returns false without switching when
/// called from outside any task.
///
/// All cooperative primitives funnel through here. No `Arc` to the task may
/// live on the task's stack across the switch: a suspended task referenced
/// only by itself would never be dropped.
pub(crate) fn suspend_current(reason: SuspendReason) -> bool {
    let yielder = match current_task() {
        Some(task) => task.yielder_ptr(),
        None => return false,
    };
    if yielder.is_null() {
        return false;
    }
    debug_assert!(
        worker::current_worker_id().is_some(),
        "task running outside a worker thread"
    );
    // SAFETY: the pointer was published by this task's trampoline and stays
    // valid while the task body is on its own stack; only the task itself
    // reaches this suspend.
    unsafe { (*yielder).suspend(reason) };
    true
}

/// Handle to a spawned task.
///
/// Handles are cheap to clone and remain valid after the task finishes.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    /// The task's unique id.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// The task's current state.
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.state() == TaskState::Finished
    }

    /// Whether the task's entry function panicked.
    pub fn panicked(&self) -> bool {
        self.task.panicked()
    }

    /// The panic message, if the task's entry function panicked.
    pub fn panic_message(&self) -> Option<String> {
        self.task.panic_message()
    }

    /// Block the calling task until this task finishes.
    ///
    /// Returns immediately if the target has already finished, and is a
    /// no-op outside any task (use [`Scheduler::wait_all`] to wait from
    /// ordinary threads). At most one task may join a given target at a
    /// time; a second concurrent joiner is a contract violation.
    ///
    /// [`Scheduler::wait_all`]: crate::Scheduler::wait_all
    pub fn join(&self) {
        {
            let Some(current) = current_task() else { return };
            debug_assert!(
                !Arc::ptr_eq(&current, &self.task),
                "a task cannot join itself"
            );
            if Arc::ptr_eq(&current, &self.task) {
                return;
            }
            debug_assert!(
                match (current.scheduler(), self.task.scheduler()) {
                    (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                    _ => true,
                },
                "join target belongs to a different scheduler"
            );
        }
        if self.task.state() == TaskState::Finished {
            return;
        }
        suspend_current(SuspendReason::Join(Arc::clone(&self.task)));
    }
}
