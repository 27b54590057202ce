//! Cooperative concurrency
//!
//! Exactly one task runs at a time. A task gives up the runner when it
//! blocks on a channel operation or a select, or when it yields. Blocked
//! operations complete by direct hand-off: the peer that unblocks a task
//! stores the operation's result in the task's resume slot before putting
//! it back on the run queue.

pub mod channel;
pub mod scheduler;
pub mod select;
pub mod task;

pub use channel::{Channel, ChannelRef, Waiter};
pub use scheduler::Scheduler;
pub use select::{SelectCase, SelectRng};
pub use task::{Resume, Task, TaskHandle, TaskId, TaskStatus};
