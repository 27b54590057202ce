//! Round-robin task scheduler
//!
//! Tasks waiting to run sit in a FIFO run queue. The running task is
//! detached from the scheduler while it executes and handed back when it
//! blocks, yields or pauses.

use super::channel::Waiter;
use super::task::{Resume, Task, TaskId, TaskStatus};
use crate::error::RuntimeError;
use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: HashMap<TaskId, Task>,
    run_queue: VecDeque<TaskId>,
    next_id: TaskId,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a new task
    pub fn next_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add a task at the back of the run queue
    pub fn spawn(&mut self, task: Task) {
        trace!(task = task.id, "task queued");
        self.requeue(task);
    }

    /// Detach the next runnable task
    pub fn take_next(&mut self) -> Option<Task> {
        while let Some(id) = self.run_queue.pop_front() {
            if let Some(task) = self.tasks.remove(&id) {
                task.handle.set_status(TaskStatus::Running);
                return Some(task);
            }
        }
        None
    }

    pub fn requeue(&mut self, task: Task) {
        task.handle.set_status(TaskStatus::Runnable);
        self.run_queue.push_back(task.id);
        self.tasks.insert(task.id, task);
    }

    /// Put a task back at the head of the queue so it runs next
    pub fn requeue_front(&mut self, task: Task) {
        task.handle.set_status(TaskStatus::Runnable);
        self.run_queue.push_front(task.id);
        self.tasks.insert(task.id, task);
    }

    /// Park a task until some waiter registered for it is woken
    pub fn block(&mut self, task: Task) {
        task.handle.set_status(TaskStatus::Blocked);
        trace!(task = task.id, epoch = task.wait_epoch, "task blocked");
        self.tasks.insert(task.id, task);
    }

    /// Whether `waiter` still refers to a parked wait of its task
    pub fn is_live(&self, waiter: &Waiter) -> bool {
        self.tasks.get(&waiter.task).is_some_and(|task| {
            task.status() == TaskStatus::Blocked && task.wait_epoch == waiter.epoch
        })
    }

    /// Wake a parked task with `resume`. Stale waiters are ignored.
    pub fn wake(&mut self, waiter: &Waiter, resume: Resume) -> bool {
        if !self.is_live(waiter) {
            return false;
        }
        let Some(task) = self.tasks.get_mut(&waiter.task) else {
            return false;
        };
        task.resume = Some(resume);
        task.wait_epoch += 1;
        task.handle.set_status(TaskStatus::Runnable);
        self.run_queue.push_back(waiter.task);
        true
    }

    /// Complete a parked channel operation with `value`
    pub fn deliver(&mut self, waiter: &Waiter, value: Value) -> bool {
        let resume = match waiter.case {
            Some(index) => Resume::Selected {
                index: index as i64,
                value,
            },
            None => Resume::Value(value),
        };
        self.wake(waiter, resume)
    }

    /// Fail a parked channel operation with `error`
    pub fn fail(&mut self, waiter: &Waiter, error: RuntimeError) -> bool {
        self.wake(waiter, Resume::Error(error))
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Tasks known to the scheduler (the running task excluded)
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove every task, for shutdown
    pub fn drain(&mut self) -> Vec<Task> {
        self.run_queue.clear();
        self.tasks.drain().map(|(_, task)| task).collect()
    }
}
