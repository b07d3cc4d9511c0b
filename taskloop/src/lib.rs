pub mod error;
pub use error::{ExecutorError, TaskFailure};

pub mod event_loop;
pub use event_loop::{Async, EventLoop, LoopHandle, RunMode, Timer};

pub mod executor;
pub use executor::{Builder, DelayedTask, DisposeHandle, TaskExecutor, TaskThread};

pub mod runner;
pub use runner::{
    DelayedTaskId, EngineError, EventLoopTaskRunner, ExceptionHandler, HandleScopeId,
    NapiTaskRunner, RunnerState, ScriptEngine, Task, TaskRunner, TaskRunnerExt, ThreadTaskRunner,
    TimerTask, default_exception_handler, set_default_exception_handler,
};

mod utils;

#[cfg(test)]
mod test_utils;
