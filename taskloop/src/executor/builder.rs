use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::event_loop::LoopHandle;
use crate::executor::{TaskExecutor, TaskThread};
use crate::runner::{ExceptionHandler, TaskRunner, default_exception_handler};

const DEFAULT_NAME: &str = "taskloop";

/// Names the OS threads spawned by the executor.
#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn(&str, TaskThread) -> String + Send + Sync>);

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|name: &str, thread: TaskThread| match thread {
        TaskThread::Js => format!("{}-js", name),
        TaskThread::Background => format!("{}-bg", name),
        TaskThread::Main | TaskThread::Worker => name.to_string(),
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and creates a [`TaskExecutor`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # use taskloop::{Builder, EventLoop, ThreadTaskRunner};
/// let event_loop = EventLoop::new();
/// let worker = Arc::new(ThreadTaskRunner::try_new("worker")?);
///
/// let executor = Builder::new()
///     .name("surface-1")
///     .background(true)
///     .try_build(event_loop.handle(), worker)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Builder {
    /// Diagnostic name. Prefixes runner and thread names.
    name: String,

    /// Whether a `Background` runner is spawned.
    background: bool,

    /// Handler installed on every runner. Defaults to the process-wide
    /// handler at build time.
    exception_handler: Option<ExceptionHandler>,

    thread_name: ThreadNameFn,

    /// Stack size for the `Js` and `Background` threads.
    thread_stack_size: Option<usize>,

    /// Raise `Js` and `Background` to user-interactive priority after start.
    raise_thread_priority: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            background: false,
            exception_handler: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            raise_thread_priority: true,
        }
    }

    pub fn name(mut self, val: impl Into<String>) -> Self {
        self.name = val.into();
        self
    }

    pub fn background(mut self, val: bool) -> Self {
        self.background = val;
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Sets a function naming the `Js` and `Background` threads from the
    /// executor name.
    ///
    /// Defaults to `"{name}-js"` and `"{name}-bg"`. Linux truncates thread
    /// names beyond 15 bytes.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, TaskThread) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for spawned runner threads.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(val > 0, "thread_stack_size must be greater than 0");
        self.thread_stack_size = Some(val);
        self
    }

    pub fn raise_thread_priority(mut self, val: bool) -> Self {
        self.raise_thread_priority = val;
        self
    }

    /// Creates the executor. `main_loop` is driven by the caller's thread,
    /// `worker` serves [`TaskThread::Worker`].
    pub fn try_build(
        self,
        main_loop: LoopHandle,
        worker: Arc<dyn TaskRunner>,
    ) -> Result<TaskExecutor> {
        let cfg = ExecutorConfig::try_from(self)?;
        TaskExecutor::try_new(cfg, main_loop, worker)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("background", &self.background)
            .field("exception_handler", &self.exception_handler.is_some())
            .field("thread_name", &self.thread_name)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("raise_thread_priority", &self.raise_thread_priority)
            .finish()
    }
}

/// Validated [`Builder`] output.
#[derive(Clone)]
pub(crate) struct ExecutorConfig {
    pub(crate) name: String,
    pub(crate) background: bool,
    /// Explicit handler, also installed on the injected worker.
    pub(crate) exception_handler: Option<ExceptionHandler>,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) raise_thread_priority: bool,
}

impl ExecutorConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("executor name must not be empty"));
        }

        for thread in [TaskThread::Js, TaskThread::Background] {
            let name = self.thread_name_for(thread);
            if name.is_empty() || name.contains('\0') {
                return Err(anyhow!(
                    "invalid thread name {:?} for {} runner",
                    name,
                    thread
                ));
            }
        }

        Ok(())
    }

    /// The handler for runners created by the executor.
    pub(crate) fn runner_exception_handler(&self) -> ExceptionHandler {
        self.exception_handler
            .clone()
            .unwrap_or_else(default_exception_handler)
    }

    pub(crate) fn thread_name_for(&self, thread: TaskThread) -> String {
        (self.thread_name.0)(&self.name, thread)
    }
}

impl TryFrom<Builder> for ExecutorConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = ExecutorConfig {
            name: builder.name,
            background: builder.background,
            exception_handler: builder.exception_handler,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            raise_thread_priority: builder.raise_thread_priority,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
