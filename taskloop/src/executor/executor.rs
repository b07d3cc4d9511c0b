use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use parking_lot::Mutex;

use crate::error::{ExecutorError, TaskFailure};
use crate::event_loop::LoopHandle;
use crate::executor::{DelayedTask, ExecutorConfig, TaskThread, WaitGraph};
use crate::runner::{
    EventLoopTaskRunner, ExceptionHandler, TaskRunner, TaskRunnerExt, ThreadTaskRunner,
};
use crate::utils::panic_payload_as_str;
use crate::utils::thread::{ThreadPriority, current_thread_name, set_current_thread_priority};

struct Runners {
    main: Arc<EventLoopTaskRunner>,
    js: ThreadTaskRunner,
    background: Option<ThreadTaskRunner>,
    worker: Arc<dyn TaskRunner>,
}

impl Runners {
    fn get(&self, thread: TaskThread) -> Option<&dyn TaskRunner> {
        match thread {
            TaskThread::Main => Some(&*self.main),
            TaskThread::Js => Some(&self.js),
            TaskThread::Background => self.background.as_ref().map(|r| r as &dyn TaskRunner),
            TaskThread::Worker => Some(&*self.worker),
        }
    }

    /// Cleans up the main runner and joins the spawned threads. `Main` must
    /// be cleaned up on its own loop, which must still be running unless the
    /// caller is that loop's thread.
    fn teardown(self) {
        self.main.cleanup();
        drop(self.js);
        drop(self.background);
        drop(self.worker);
    }
}

/// Dispatches tasks to the runner serving a [`TaskThread`].
///
/// `Main` runs on the embedder's loop, `Js` and `Background` on threads owned
/// by the executor and `Worker` on an injected runner.
///
/// Synchronous calls across threads are tracked so that a call which would
/// close a cycle of blocked threads fails with
/// [`ExecutorError::DeadlockDetected`] instead of hanging.
pub struct TaskExecutor {
    name: String,

    runners: Option<Runners>,

    waits: WaitGraph,

    next_trace_id: AtomicU64,
}

impl TaskExecutor {
    pub(crate) fn try_new(
        cfg: ExecutorConfig,
        main_loop: LoopHandle,
        worker: Arc<dyn TaskRunner>,
    ) -> Result<Self> {
        let handler = cfg.runner_exception_handler();
        let main = EventLoopTaskRunner::with_exception_handler(
            format!("{}-main", cfg.name),
            main_loop,
            handler.clone(),
        );

        let js = ThreadTaskRunner::start(
            cfg.thread_name_for(TaskThread::Js),
            handler.clone(),
            cfg.thread_stack_size,
        )?;

        let background = if cfg.background {
            Some(ThreadTaskRunner::start(
                cfg.thread_name_for(TaskThread::Background),
                handler.clone(),
                cfg.thread_stack_size,
            )?)
        } else {
            None
        };

        if let Some(handler) = &cfg.exception_handler {
            worker.set_exception_handler(handler.clone());
        }

        if cfg.raise_thread_priority {
            raise_priority(&js);
            if let Some(background) = &background {
                raise_priority(background);
            }
        }

        tracing::debug!(
            executor = %cfg.name,
            background = cfg.background,
            "executor started"
        );

        Ok(Self {
            name: cfg.name,
            runners: Some(Runners {
                main,
                js,
                background,
                worker,
            }),
            waits: WaitGraph::new(),
            next_trace_id: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn runner(&self, thread: TaskThread) -> Result<&dyn TaskRunner, ExecutorError> {
        self.runners
            .as_ref()
            .and_then(|runners| runners.get(thread))
            .ok_or(ExecutorError::RunnerUnavailable(thread))
    }

    fn task_span(&self, thread: TaskThread) -> tracing::Span {
        let id = self.next_trace_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace_span!("task", id, thread = %thread)
    }

    /// Queues `f` on `thread` and returns immediately.
    pub fn run_task<F>(&self, thread: TaskThread, f: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let runner = self.runner(thread)?;
        let span = self.task_span(thread);

        runner.spawn(move || {
            let _entered = span.enter();
            f();
        });

        Ok(())
    }

    /// Runs `f` on `thread` and returns its result once it completed.
    ///
    /// Called from `thread` itself, `f` runs inline. A panic inside `f` is
    /// returned as [`ExecutorError::TaskFailed`]. Blocking on a thread that
    /// already waits, directly or through other threads, on the caller's
    /// thread fails with [`ExecutorError::DeadlockDetected`] and `f` never
    /// runs.
    pub fn run_sync_task<F, R>(&self, thread: TaskThread, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let runner = self.runner(thread)?;

        let _edge = match self.get_current_task_thread() {
            Some(current) if current != thread => Some(self.waits.try_wait(current, thread)?),
            _ => None,
        };

        let slot: Arc<Mutex<Option<Result<R, TaskFailure>>>> = Arc::new(Mutex::new(None));
        let out = slot.clone();
        let span = self.task_span(thread);

        runner.block_on(move || {
            let _entered = span.enter();
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| TaskFailure::from_panic(&thread.to_string(), payload));
            *out.lock() = Some(result);
        });

        let result = slot.lock().take();
        match result {
            Some(result) => result.map_err(ExecutorError::from),
            None => Err(ExecutorError::TaskDropped(thread)),
        }
    }

    /// Schedules `f` on `thread` after `delay_ms`, then every `repeat_ms` if
    /// non-zero.
    pub fn run_delayed_task<F>(
        &self,
        thread: TaskThread,
        f: F,
        delay_ms: u64,
        repeat_ms: u64,
    ) -> Result<DelayedTask, ExecutorError>
    where
        F: FnMut() + Send + 'static,
    {
        let runner = self.runner(thread)?;
        let id = runner.schedule(f, delay_ms, repeat_ms);

        Ok(DelayedTask { id, thread })
    }

    pub fn cancel_delayed_task(&self, task: DelayedTask) -> Result<(), ExecutorError> {
        self.runner(task.thread)?.cancel_delayed_task(task.id);
        Ok(())
    }

    /// The logical thread the caller is running on, if any.
    pub fn get_current_task_thread(&self) -> Option<TaskThread> {
        TaskThread::ALL.into_iter().find(|thread| {
            self.runner(*thread)
                .is_ok_and(|runner| runner.is_on_current_thread())
        })
    }

    pub fn is_on_task_thread(&self, thread: TaskThread) -> bool {
        self.runner(thread)
            .is_ok_and(|runner| runner.is_on_current_thread())
    }

    /// The thread `thread` is currently blocked on in a synchronous call.
    pub fn waits_on(&self, thread: TaskThread) -> Option<TaskThread> {
        self.waits.waits_on(thread)
    }

    /// Installs `handler` on every runner, including the injected worker.
    pub fn set_exception_handler(&self, handler: ExceptionHandler) {
        for thread in TaskThread::ALL {
            if let Ok(runner) = self.runner(thread) {
                runner.set_exception_handler(handler.clone());
            }
        }
    }

    /// Tears the executor down on a separate thread.
    ///
    /// The main runner is cleaned up on the main loop, which must keep
    /// running until the returned handle completes unless `dispose` is
    /// called from the main loop thread. Do not wait on the handle from a
    /// runner thread.
    pub fn dispose(mut self) -> DisposeHandle {
        let thread = self.runners.take().and_then(|runners| spawn_teardown(&self.name, runners));
        DisposeHandle { thread }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        // Detached: dropping the executor never blocks on runner threads.
        if let Some(runners) = self.runners.take() {
            drop(spawn_teardown(&self.name, runners));
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("name", &self.name)
            .field("waits", &self.waits)
            .finish()
    }
}

fn raise_priority(runner: &ThreadTaskRunner) {
    runner.spawn(|| {
        if let Err(e) = set_current_thread_priority(ThreadPriority::UserInteractive) {
            tracing::warn!(
                thread = %current_thread_name(),
                error = %e,
                "failed to raise thread priority"
            );
        }
    });
}

fn spawn_teardown(name: &str, runners: Runners) -> Option<JoinHandle<()>> {
    // The teardown thread would otherwise block on a loop nobody drives.
    if runners.main.is_on_current_thread() {
        runners.main.cleanup();
    }

    let executor = name.to_string();
    let spawned = thread::Builder::new()
        .name(format!("{}-teardown", name))
        .spawn(move || {
            runners.teardown();
            tracing::debug!(executor = %executor, "executor torn down");
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            // The closure, and the runners with it, were dropped in place.
            tracing::warn!(executor = %name, error = %e, "failed to spawn teardown thread");
            None
        }
    }
}

/// Completion of a [`TaskExecutor::dispose`].
#[derive(Debug)]
pub struct DisposeHandle {
    thread: Option<JoinHandle<()>>,
}

impl DisposeHandle {
    /// Blocks until every runner was cleaned up and its thread joined.
    pub fn wait(mut self) -> Result<()> {
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|payload| {
                anyhow!(
                    "executor teardown panicked: {}",
                    panic_payload_as_str(payload.as_ref()).unwrap_or("opaque panic payload")
                )
            }),
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|handle| handle.is_finished())
    }
}
