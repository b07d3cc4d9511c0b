use std::fmt;

use crate::runner::DelayedTaskId;

mod builder;
pub use builder::Builder;
pub(crate) use builder::ExecutorConfig;

mod deadlock;
pub(crate) use deadlock::WaitGraph;

#[allow(clippy::module_inception)]
mod executor;
pub use executor::{DisposeHandle, TaskExecutor};


/// Logical threads a [`TaskExecutor`] dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskThread {
    /// The embedder's UI thread, driving the loop handed to the builder.
    Main,
    /// The scripting engine thread.
    Js,
    /// Optional low-priority thread.
    Background,
    /// Runner injected by the embedder.
    Worker,
}

impl TaskThread {
    pub const COUNT: usize = 4;

    /// Every thread, in the order [`TaskExecutor::get_current_task_thread`]
    /// probes them.
    pub const ALL: [TaskThread; Self::COUNT] = [
        TaskThread::Main,
        TaskThread::Js,
        TaskThread::Background,
        TaskThread::Worker,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            TaskThread::Main => 0,
            TaskThread::Js => 1,
            TaskThread::Background => 2,
            TaskThread::Worker => 3,
        }
    }
}

impl fmt::Display for TaskThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskThread::Main => "MAIN",
            TaskThread::Js => "JS",
            TaskThread::Background => "BACKGROUND",
            TaskThread::Worker => "WORKER",
        };
        f.write_str(name)
    }
}

/// A delayed task scheduled through a [`TaskExecutor`]. Remembers which
/// runner owns the timer so cancellation reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayedTask {
    pub id: DelayedTaskId,
    pub thread: TaskThread,
}
