use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::event_loop::LoopHandle;
use crate::runner::event_loop::TaskScope;
use crate::runner::{
    DelayedTaskId, EventLoopTaskRunner, ExceptionHandler, Task, TaskRunner, TimerTask,
    default_exception_handler,
};
use crate::utils::ScopeGuard;

/// Identifies an open handle scope of a [`ScriptEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleScopeId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open handle scope: {0}")]
    OpenScope(String),

    #[error("failed to close handle scope {scope:?}: {reason}")]
    CloseScope { scope: HandleScopeId, reason: String },
}

/// The capabilities a scripting engine exposes to its task runner.
pub trait ScriptEngine: Send + Sync + 'static {
    /// The loop the engine runs on.
    fn event_loop(&self) -> LoopHandle;

    /// Opens a scope collecting the engine handles created by one task.
    fn open_handle_scope(&self) -> Result<HandleScopeId, EngineError>;

    fn close_handle_scope(&self, scope: HandleScopeId) -> Result<(), EngineError>;
}

struct HandleScoped<E> {
    engine: Arc<E>,
}

impl<E: ScriptEngine> TaskScope for HandleScoped<E> {
    fn enter(&self, body: &mut dyn FnMut()) {
        let scope = match self.engine.open_handle_scope() {
            Ok(scope) => scope,
            Err(e) => {
                tracing::warn!(error = %e, "skipping task, no handle scope");
                return;
            }
        };

        let _close = ScopeGuard::new(|| {
            if let Err(e) = self.engine.close_handle_scope(scope) {
                tracing::warn!(error = %e, "handle scope leaked");
            }
        });

        body();
    }
}

/// Runs tasks on a scripting engine's loop, each inside its own handle scope.
///
/// Must be created on the engine thread (asserted): thread affinity is
/// decided by the thread that constructed the runner, engines never migrate.
pub struct NapiTaskRunner {
    inner: Arc<EventLoopTaskRunner>,
    thread_id: ThreadId,
}

impl NapiTaskRunner {
    pub fn new<E: ScriptEngine>(name: impl Into<String>, engine: Arc<E>) -> Self {
        Self::with_exception_handler(name, engine, default_exception_handler())
    }

    pub fn with_exception_handler<E: ScriptEngine>(
        name: impl Into<String>,
        engine: Arc<E>,
        handler: ExceptionHandler,
    ) -> Self {
        let event_loop: LoopHandle = engine.event_loop();
        assert!(
            event_loop.is_on_loop_thread(),
            "NapiTaskRunner must be created on the engine thread"
        );

        let inner = EventLoopTaskRunner::build(
            name.into(),
            event_loop,
            handler,
            false,
            Box::new(HandleScoped { engine }),
        );

        Self {
            inner,
            thread_id: thread::current().id(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// See [`EventLoopTaskRunner::cleanup`].
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    pub fn runner(&self) -> &Arc<EventLoopTaskRunner> {
        &self.inner
    }
}

impl TaskRunner for NapiTaskRunner {
    fn run_async_task(&self, task: Task) {
        self.inner.run_async_task(task);
    }

    fn run_sync_task(&self, task: Task) {
        self.inner.run_sync_task(task);
    }

    fn run_delayed_task(&self, task: TimerTask, delay_ms: u64, repeat_ms: u64) -> DelayedTaskId {
        self.inner.run_delayed_task(task, delay_ms, repeat_ms)
    }

    fn cancel_delayed_task(&self, id: DelayedTaskId) {
        self.inner.cancel_delayed_task(id);
    }

    fn is_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.inner.set_exception_handler(handler);
    }
}

impl std::fmt::Debug for NapiTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NapiTaskRunner")
            .field("inner", &self.inner)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
