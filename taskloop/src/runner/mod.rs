//! Task runners.
//!
//! A [`TaskRunner`] executes closures on one specific thread. Three flavours
//! exist:
//!
//! - [`EventLoopTaskRunner`]: drives tasks from an existing [`EventLoop`]
//!   owned by the caller.
//! - [`NapiTaskRunner`]: same, on the loop of a scripting engine, with every
//!   task bracketed by a handle scope.
//! - [`ThreadTaskRunner`]: owns a dedicated OS thread with a private loop.
//!
//! [`EventLoop`]: crate::event_loop::EventLoop

use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::error::TaskFailure;

pub(crate) mod event_loop;
pub use event_loop::{EventLoopTaskRunner, RunnerState};

pub(crate) mod napi;
pub use napi::{EngineError, HandleScopeId, NapiTaskRunner, ScriptEngine};

pub(crate) mod thread;
pub use thread::ThreadTaskRunner;


/// A unit of work executed at most once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Work driven by a timer. Repeating timers invoke it once per firing.
pub type TimerTask = Box<dyn FnMut() + Send + 'static>;

/// Receives every panic escaping a task executed by a runner.
pub type ExceptionHandler = Arc<dyn Fn(&TaskFailure) + Send + Sync + 'static>;

/// Identifies a delayed task within the runner that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelayedTaskId(u64);

impl DelayedTaskId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DelayedTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Executes tasks on a single, fixed thread.
///
/// Implementations share no behaviour: each one provides every method.
pub trait TaskRunner: Send + Sync {
    /// Queues `task` and returns immediately.
    fn run_async_task(&self, task: Task);

    /// Runs `task` on the runner thread and returns once it finished.
    ///
    /// Called from the runner thread, the task runs inline. Otherwise the
    /// caller blocks until the runner executed the task, or until the task
    /// panicked. Panics are reported to the runner's exception handler, not
    /// to the caller.
    fn run_sync_task(&self, task: Task);

    /// Schedules `task` after `delay_ms`, then every `repeat_ms` when it is
    /// non-zero.
    fn run_delayed_task(&self, task: TimerTask, delay_ms: u64, repeat_ms: u64) -> DelayedTaskId;

    /// Cancels a delayed task. Unknown or already fired ids are ignored.
    fn cancel_delayed_task(&self, id: DelayedTaskId);

    fn is_on_current_thread(&self) -> bool;

    fn set_exception_handler(&self, handler: ExceptionHandler);
}

/// Closure-taking conveniences over [`TaskRunner`].
pub trait TaskRunnerExt: TaskRunner {
    fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_async_task(Box::new(f));
    }

    fn block_on<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_sync_task(Box::new(f));
    }

    fn schedule<F>(&self, f: F, delay_ms: u64, repeat_ms: u64) -> DelayedTaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.run_delayed_task(Box::new(f), delay_ms, repeat_ms)
    }
}

impl<R: TaskRunner + ?Sized> TaskRunnerExt for R {}

static DEFAULT_EXCEPTION_HANDLER: LazyLock<RwLock<ExceptionHandler>> =
    LazyLock::new(|| RwLock::new(Arc::new(log_task_failure)));

fn log_task_failure(failure: &TaskFailure) {
    tracing::error!(
        runner = failure.runner(),
        message = failure.message(),
        "uncaught panic in task"
    );
}

/// The handler new runners start with.
pub fn default_exception_handler() -> ExceptionHandler {
    DEFAULT_EXCEPTION_HANDLER.read().clone()
}

/// Replaces the process-wide handler used by runners created afterwards.
/// Existing runners keep the handler they were built with.
pub fn set_default_exception_handler(handler: ExceptionHandler) {
    *DEFAULT_EXCEPTION_HANDLER.write() = handler;
}
