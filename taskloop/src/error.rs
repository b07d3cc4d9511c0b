use std::any::Any;

use crate::executor::TaskThread;
use crate::utils::panic_payload_as_str;

/// A task that panicked while a runner was executing it.
///
/// The panic payload is rendered to text on the runner thread so the failure
/// can cross threads and be cloned into every interested party (exception
/// handler, blocked caller, logs).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task on runner '{runner}' panicked: {message}")]
pub struct TaskFailure {
    runner: String,
    message: String,
}

impl TaskFailure {
    pub fn new(runner: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(runner: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = panic_payload_as_str(payload.as_ref())
            .unwrap_or("opaque panic payload")
            .to_string();

        Self::new(runner, message)
    }

    /// Name of the runner the task was executing on.
    pub fn runner(&self) -> &str {
        &self.runner
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned by [`TaskExecutor`](crate::TaskExecutor) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Blocking on `target` would close a cycle of threads waiting on each
    /// other. The task was not submitted.
    #[error("deadlock detected: {caller} cannot block on {target}, which is already waiting on it")]
    DeadlockDetected {
        caller: TaskThread,
        target: TaskThread,
    },

    #[error(transparent)]
    TaskFailed(#[from] TaskFailure),

    #[error("no runner configured for thread {0}")]
    RunnerUnavailable(TaskThread),

    /// The runner was torn down before the task got a chance to run.
    #[error("task submitted to {0} was dropped before running")]
    TaskDropped(TaskThread),
}

impl ExecutorError {
    pub fn is_deadlock(&self) -> bool {
        matches!(self, ExecutorError::DeadlockDetected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_task_failure_from_panic() {
        let payload = panic::catch_unwind(|| panic!("bad index {}", 3)).unwrap_err();
        let failure = TaskFailure::from_panic("main", payload);

        assert_eq!(failure.runner(), "main");
        assert_eq!(failure.message(), "bad index 3");
        assert_eq!(
            failure.to_string(),
            "task on runner 'main' panicked: bad index 3"
        );
    }

    #[test]
    fn test_task_failure_opaque_payload() {
        let payload = panic::catch_unwind(|| panic::panic_any(1_u8)).unwrap_err();
        let failure = TaskFailure::from_panic("js", payload);

        assert_eq!(failure.message(), "opaque panic payload");
    }

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::DeadlockDetected {
            caller: TaskThread::Main,
            target: TaskThread::Js,
        };
        assert!(err.is_deadlock());
        assert_eq!(
            err.to_string(),
            "deadlock detected: MAIN cannot block on JS, which is already waiting on it"
        );

        let err: ExecutorError = TaskFailure::new("js", "boom").into();
        assert!(!err.is_deadlock());
        assert_eq!(err.to_string(), "task on runner 'js' panicked: boom");

        assert_eq!(
            ExecutorError::RunnerUnavailable(TaskThread::Background).to_string(),
            "no runner configured for thread BACKGROUND"
        );
    }
}
