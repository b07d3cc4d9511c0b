use parking_lot::Mutex;

use crate::error::ExecutorError;
use crate::executor::TaskThread;

/// Which thread each thread is blocked on in a synchronous call.
///
/// Every thread has at most one outgoing edge: a thread blocked in
/// `run_sync_task` cannot issue another call. The graph stays acyclic because
/// an edge that would close a cycle is refused.
#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    edges: Mutex<[Option<TaskThread>; TaskThread::COUNT]>,
}

impl WaitGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records that `caller` blocks on `target`.
    ///
    /// Fails if `target` transitively waits on `caller`. Checking and
    /// recording happen under one lock, so of two threads calling into each
    /// other at the same time exactly one is refused.
    pub(crate) fn try_wait(
        &self,
        caller: TaskThread,
        target: TaskThread,
    ) -> Result<WaitEdge<'_>, ExecutorError> {
        let mut edges = self.edges.lock();

        let mut cursor = Some(target);
        for _ in 0..=TaskThread::COUNT {
            let Some(thread) = cursor else {
                break;
            };
            if thread == caller {
                return Err(ExecutorError::DeadlockDetected { caller, target });
            }
            cursor = edges[thread.index()];
        }

        let previous = edges[caller.index()].replace(target);

        Ok(WaitEdge {
            graph: self,
            caller,
            previous,
        })
    }

    pub(crate) fn waits_on(&self, thread: TaskThread) -> Option<TaskThread> {
        self.edges.lock()[thread.index()]
    }
}

/// Removes its edge from the graph when dropped.
#[derive(Debug)]
pub(crate) struct WaitEdge<'a> {
    graph: &'a WaitGraph,
    caller: TaskThread,
    previous: Option<TaskThread>,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        self.graph.edges.lock()[self.caller.index()] = self.previous;
    }
}
