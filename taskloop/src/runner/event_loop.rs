use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::TaskFailure;
use crate::event_loop::{Async, LoopHandle, Timer};
use crate::runner::{
    DelayedTaskId, ExceptionHandler, Task, TaskRunner, TimerTask, default_exception_handler,
};
use crate::utils::ScopeGuard;

/// Lifecycle of an [`EventLoopTaskRunner`]. Transitions happen once, in
/// order, inside [`EventLoopTaskRunner::cleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl From<u8> for RunnerState {
    fn from(value: u8) -> Self {
        match value {
            0 => RunnerState::Running,
            1 => RunnerState::Stopping,
            _ => RunnerState::Stopped,
        }
    }
}

/// Wraps the execution of every submitted or timer-driven task. Runner
/// bookkeeping (cleanup, timer start and cancellation) runs outside of it.
pub(crate) trait TaskScope: Send + Sync {
    fn enter(&self, body: &mut dyn FnMut());
}

pub(crate) struct PlainScope;

impl TaskScope for PlainScope {
    fn enter(&self, body: &mut dyn FnMut()) {
        body();
    }
}

/// Runs tasks on the thread that owns an [`EventLoop`](crate::EventLoop).
///
/// Tasks are queued in two FIFOs: sync tasks, submitted by callers blocked
/// in [`run_sync_task`](TaskRunner::run_sync_task), and async tasks. Every
/// wake of the loop executes a single task, preferring the sync queue, and
/// re-signals the loop while work remains. Runner bookkeeping goes through a
/// third queue drained ahead of both. This keeps the loop responsive to
/// its other handles between tasks.
///
/// The runner does not drive the loop itself: the owner thread must call
/// [`EventLoop::run`](crate::EventLoop::run).
pub struct EventLoopTaskRunner {
    name: String,

    this: Weak<EventLoopTaskRunner>,

    event_loop: LoopHandle,

    // Stop the loop on cleanup. Set for loops created for the runner.
    owns_loop: bool,

    // Runner bookkeeping. Drained first and never wrapped in `scope`.
    control_queue: SegQueue<Task>,

    sync_queue: SegQueue<Task>,

    async_queue: SegQueue<Task>,

    // Closed on cleanup.
    wake: RwLock<Option<Async>>,

    // Only mutated on the loop thread.
    timers: DashMap<DelayedTaskId, Timer>,

    next_delayed_id: AtomicU64,

    exception_handler: RwLock<ExceptionHandler>,

    state: AtomicU8,

    scope: Box<dyn TaskScope>,
}

impl EventLoopTaskRunner {
    /// Creates a runner on `event_loop` with the process-wide default
    /// exception handler.
    pub fn new(name: impl Into<String>, event_loop: LoopHandle) -> Arc<Self> {
        Self::with_exception_handler(name, event_loop, default_exception_handler())
    }

    pub fn with_exception_handler(
        name: impl Into<String>,
        event_loop: LoopHandle,
        handler: ExceptionHandler,
    ) -> Arc<Self> {
        Self::build(name.into(), event_loop, handler, false, Box::new(PlainScope))
    }

    pub(crate) fn build(
        name: String,
        event_loop: LoopHandle,
        handler: ExceptionHandler,
        owns_loop: bool,
        scope: Box<dyn TaskScope>,
    ) -> Arc<Self> {
        let runner = Arc::new_cyclic(|this: &Weak<Self>| {
            let weak = this.clone();
            let wake = Async::new(&event_loop, move || {
                if let Some(runner) = weak.upgrade() {
                    runner.on_wake();
                }
            });

            Self {
                name,
                this: this.clone(),
                event_loop,
                owns_loop,
                control_queue: SegQueue::new(),
                sync_queue: SegQueue::new(),
                async_queue: SegQueue::new(),
                wake: RwLock::new(Some(wake)),
                timers: DashMap::new(),
                next_delayed_id: AtomicU64::new(0),
                exception_handler: RwLock::new(handler),
                state: AtomicU8::new(RunnerState::Running as u8),
                scope,
            }
        });

        tracing::debug!(runner = %runner.name, owner = ?runner.event_loop.owner(), "runner created");
        runner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from(self.state.load(Ordering::Acquire))
    }

    pub fn event_loop(&self) -> &LoopHandle {
        &self.event_loop
    }

    /// Number of queued tasks, runner bookkeeping included.
    pub fn pending_tasks(&self) -> usize {
        self.control_queue.len() + self.sync_queue.len() + self.async_queue.len()
    }

    /// Number of delayed tasks that have not fired (one-shot) or have not
    /// been cancelled (repeating).
    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    /// Stops the runner: executes the sync tasks still queued so their
    /// callers are released, drops queued async tasks, closes all timers and
    /// the wake handle.
    ///
    /// Always executes on the loop thread; from any other thread the call
    /// blocks until the loop processed it. Calling it again is a no-op. The
    /// request bypasses the task scope, so it completes even when the scope
    /// cannot be opened.
    pub fn cleanup(&self) {
        if !self.is_on_current_thread() {
            if self.state() == RunnerState::Stopped {
                return;
            }

            let this = self.this.clone();
            self.block_on_loop(
                &self.control_queue,
                Box::new(move || {
                    if let Some(runner) = this.upgrade() {
                        runner.cleanup();
                    }
                }),
            );
            return;
        }

        if self
            .state
            .compare_exchange(
                RunnerState::Running as u8,
                RunnerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        tracing::debug!(runner = %self.name, "stopping runner");

        // Timer starts turn into no-ops once stopping, a queued cleanup
        // request releases its caller.
        while let Some(task) = self.control_queue.pop() {
            self.execute_control(task);
        }

        while let Some(task) = self.sync_queue.pop() {
            self.execute_task(task);
        }

        let mut dropped = 0;
        while let Some(task) = self.async_queue.pop() {
            drop(task);
            dropped += 1;
        }

        let ids: Vec<DelayedTaskId> = self.timers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.timers.remove(&id);
        }

        let wake = self.wake.write().take();
        drop(wake);

        self.state
            .store(RunnerState::Stopped as u8, Ordering::SeqCst);

        // Submissions that raced with the transition.
        self.drop_queued();

        if self.owns_loop {
            self.event_loop.stop();
        }

        tracing::debug!(runner = %self.name, dropped, "runner stopped");
    }

    fn assert_usable(&self) {
        assert!(
            self.state() != RunnerState::Stopped,
            "task submitted to runner '{}' after cleanup",
            self.name
        );
    }

    fn signal(&self) {
        if let Some(wake) = self.wake.read().as_ref() {
            wake.send();
        }
    }

    // A task queued after cleanup completed is never executed. Dropping it
    // releases a caller blocked on it.
    fn drop_queued(&self) {
        if RunnerState::from(self.state.load(Ordering::SeqCst)) != RunnerState::Stopped {
            return;
        }

        while let Some(task) = self.control_queue.pop() {
            drop(task);
        }
        while let Some(task) = self.sync_queue.pop() {
            drop(task);
        }
        while let Some(task) = self.async_queue.pop() {
            drop(task);
        }
    }

    fn on_wake(&self) {
        if let Some(task) = self.control_queue.pop() {
            self.execute_control(task);
        } else if let Some(task) = self.sync_queue.pop().or_else(|| self.async_queue.pop()) {
            self.execute_task(task);
        }

        if self.pending_tasks() > 0 {
            self.signal();
        }
    }

    fn execute_control(&self, task: Task) {
        let mut task = Some(task);
        self.catching(&mut || {
            if let Some(task) = task.take() {
                task();
            }
        });
    }

    fn execute_task(&self, task: Task) {
        let mut task = Some(task);
        self.guarded(&mut || {
            if let Some(task) = task.take() {
                task();
            }
        });
    }

    fn guarded(&self, body: &mut dyn FnMut()) {
        tracing::trace!(runner = %self.name, "executing task");

        self.scope.enter(&mut || self.catching(body));
    }

    fn catching(&self, body: &mut dyn FnMut()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body())) {
            let failure = TaskFailure::from_panic(&self.name, payload);
            let handler = self.exception_handler.read().clone();
            handler(&failure);
        }
    }

    fn block_on_loop(&self, queue: &SegQueue<Task>, task: Task) {
        let completion = Arc::new(Completion::default());

        let signal = completion.clone();
        let done = ScopeGuard::new(move || signal.notify());

        queue.push(Box::new(move || {
            let _done = done;
            task();
        }));
        self.signal();
        self.drop_queued();

        completion.wait();
    }

    fn run_control(&self, task: Task) {
        self.assert_usable();

        self.control_queue.push(task);
        self.signal();
        self.drop_queued();
    }

    fn start_timer(&self, id: DelayedTaskId, mut task: TimerTask, delay_ms: u64, repeat_ms: u64) {
        if self.state() != RunnerState::Running {
            return;
        }

        let timer = Timer::new(&self.event_loop);
        let this = self.this.clone();
        let one_shot = repeat_ms == 0;

        timer.start(
            move || {
                let Some(runner) = this.upgrade() else {
                    return;
                };

                runner.guarded(&mut *task);

                if one_shot {
                    runner.timers.remove(&id);
                }
            },
            Duration::from_millis(delay_ms),
            Duration::from_millis(repeat_ms),
        );

        tracing::trace!(runner = %self.name, %id, delay_ms, repeat_ms, "timer armed");
        self.timers.insert(id, timer);
    }
}

impl TaskRunner for EventLoopTaskRunner {
    fn run_async_task(&self, task: Task) {
        self.assert_usable();

        self.async_queue.push(task);
        self.signal();
        self.drop_queued();
    }

    fn run_sync_task(&self, task: Task) {
        self.assert_usable();

        if self.is_on_current_thread() {
            task();
            return;
        }

        self.block_on_loop(&self.sync_queue, task);
    }

    fn run_delayed_task(&self, task: TimerTask, delay_ms: u64, repeat_ms: u64) -> DelayedTaskId {
        self.assert_usable();

        let id = DelayedTaskId::new(self.next_delayed_id.fetch_add(1, Ordering::Relaxed) + 1);
        let this = self.this.clone();
        let start = move || {
            if let Some(runner) = this.upgrade() {
                runner.start_timer(id, task, delay_ms, repeat_ms);
            }
        };

        if self.is_on_current_thread() {
            start();
        } else {
            self.run_control(Box::new(start));
        }

        id
    }

    fn cancel_delayed_task(&self, id: DelayedTaskId) {
        let this = self.this.clone();
        self.run_control(Box::new(move || {
            if let Some(runner) = this.upgrade() {
                let timer = runner.timers.remove(&id);
                tracing::trace!(runner = %runner.name, %id, found = timer.is_some(), "timer cancelled");
            }
        }));
    }

    fn is_on_current_thread(&self) -> bool {
        self.event_loop.is_on_loop_thread()
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        *self.exception_handler.write() = handler;
    }
}

impl Drop for EventLoopTaskRunner {
    fn drop(&mut self) {
        if !thread::panicking() {
            debug_assert!(
                self.sync_queue.is_empty() && self.control_queue.is_empty(),
                "runner '{}' dropped with blocked callers",
                self.name
            );
        }
    }
}

impl std::fmt::Debug for EventLoopTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopTaskRunner")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending_tasks", &self.pending_tasks())
            .field("active_timers", &self.active_timers())
            .finish()
    }
}

/// Completion flag a blocked caller waits on.
#[derive(Default)]
struct Completion {
    done: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Completion {
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.done.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.done.load(Ordering::Acquire) {
            self.cond.wait(&mut guard);
        }
    }
}
