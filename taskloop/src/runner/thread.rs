use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{Context, Result, anyhow};

use crate::event_loop::{EventLoop, RunMode};
use crate::runner::event_loop::PlainScope;
use crate::runner::{
    DelayedTaskId, EventLoopTaskRunner, ExceptionHandler, Task, TaskRunner, TimerTask,
    default_exception_handler,
};
use crate::utils::panic_payload_as_str;

/// Runs tasks on a dedicated OS thread.
///
/// The thread owns a private [`EventLoop`] that it drives until the runner is
/// dropped. Dropping the runner cleans up the inner runner, which stops the
/// loop, then joins the thread: a task in flight finishes first.
pub struct ThreadTaskRunner {
    runner: Arc<EventLoopTaskRunner>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTaskRunner {
    pub fn try_new(name: impl Into<String>) -> Result<Self> {
        Self::start(name.into(), default_exception_handler(), None)
    }

    pub fn with_exception_handler(
        name: impl Into<String>,
        handler: ExceptionHandler,
    ) -> Result<Self> {
        Self::start(name.into(), handler, None)
    }

    /// Spawns the runner thread and blocks until its loop and inner runner
    /// exist.
    pub(crate) fn start(
        name: String,
        handler: ExceptionHandler,
        stack_size: Option<usize>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let runner_name = name.clone();
        let handle = builder
            .spawn(move || {
                let event_loop = EventLoop::new();
                let runner = EventLoopTaskRunner::build(
                    runner_name,
                    event_loop.handle(),
                    handler,
                    true,
                    Box::new(PlainScope),
                );

                let name = runner.name().to_string();
                let weak = Arc::downgrade(&runner);
                if tx.send(runner).is_err() {
                    return;
                }

                event_loop.run(RunMode::Default);
                tracing::debug!(runner = %name, "runner loop exited");

                // The loop may have been stopped from outside while a
                // cleanup request was already queued on it.
                if let Some(runner) = weak.upgrade() {
                    runner.cleanup();
                }
            })
            .with_context(|| format!("failed to spawn runner thread '{}'", name))?;

        let thread_id = handle.thread().id();
        let runner = match rx.recv() {
            Ok(runner) => runner,
            Err(_) => {
                let reason = match handle.join() {
                    Err(payload) => panic_payload_as_str(payload.as_ref())
                        .unwrap_or("opaque panic payload")
                        .to_string(),
                    Ok(()) => "thread exited early".to_string(),
                };
                return Err(anyhow!("runner thread '{}' failed to start: {}", name, reason));
            }
        };

        Ok(Self {
            runner,
            thread_id,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        self.runner.name()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// The inner runner. Stopping its loop directly ends the thread early:
    /// pending sync callers are released and later submissions panic.
    pub fn runner(&self) -> &Arc<EventLoopTaskRunner> {
        &self.runner
    }
}

impl TaskRunner for ThreadTaskRunner {
    fn run_async_task(&self, task: Task) {
        self.runner.run_async_task(task);
    }

    fn run_sync_task(&self, task: Task) {
        self.runner.run_sync_task(task);
    }

    fn run_delayed_task(&self, task: TimerTask, delay_ms: u64, repeat_ms: u64) -> DelayedTaskId {
        self.runner.run_delayed_task(task, delay_ms, repeat_ms)
    }

    fn cancel_delayed_task(&self, id: DelayedTaskId) {
        self.runner.cancel_delayed_task(id);
    }

    fn is_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.runner.set_exception_handler(handler);
    }
}

impl Drop for ThreadTaskRunner {
    fn drop(&mut self) {
        assert!(
            !self.is_on_current_thread(),
            "runner '{}' dropped on its own thread",
            self.runner.name()
        );

        // A dead loop thread cannot process the cleanup request.
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            self.runner.cleanup();
        }

        if let Some(handle) = self.handle.take()
            && let Err(payload) = handle.join()
        {
            tracing::error!(
                runner = %self.runner.name(),
                panic = panic_payload_as_str(payload.as_ref()).unwrap_or("opaque panic payload"),
                "runner thread panicked"
            );
        }
    }
}

impl std::fmt::Debug for ThreadTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTaskRunner")
            .field("runner", &self.runner)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
