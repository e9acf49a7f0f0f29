//! FIFO ready queue
//!
//! Holds tasks in Ready state, in enqueue order. The queue carries no lock
//! of its own: it lives inside the scheduler's locked state and every
//! mutation happens while that lock is held, collapsing the two locks into
//! one.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::scheduler::task::{Task, TaskState};

/// FIFO queue of runnable tasks. Callers hold the scheduler lock.
pub(crate) struct ReadyQueue {
    tasks: VecDeque<Arc<Task>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    /// Append a task at the tail. The task must already be Ready and must
    /// not be queued anywhere else.
    pub fn push(&mut self, task: Arc<Task>) {
        debug_assert_eq!(task.state(), TaskState::Ready);
        debug_assert!(
            !self.tasks.iter().any(|t| Arc::ptr_eq(t, &task)),
            "task is already queued"
        );
        self.tasks.push_back(task);
    }

    /// Remove and return the head task, if any.
    pub fn pop(&mut self) -> Option<Arc<Task>> {
        self.tasks.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
