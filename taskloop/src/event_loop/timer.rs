use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{LoopCore, LoopHandle};

pub(super) type TimerCallback = Box<dyn FnMut() + Send>;

pub(super) struct TimerSlot {
    pub(super) generation: u64,

    /// Sequence number of the deadline currently scheduled, if armed.
    pub(super) armed: Option<u64>,

    pub(super) repeat: Duration,

    /// `None` while the callback is executing.
    pub(super) callback: Option<TimerCallback>,
}

/// Heap entry. Ordered by deadline, ties broken by the order timers were
/// started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Deadline {
    pub(super) at: Instant,
    pub(super) seq: u64,
    pub(super) key: usize,
}

/// A one-shot or repeating timer driven by an [`EventLoop`](super::EventLoop).
pub struct Timer {
    core: Arc<LoopCore>,
    key: usize,
}

impl Timer {
    pub fn new(handle: &LoopHandle) -> Self {
        let core = handle.core.clone();
        let key = {
            let mut state = core.state.lock();
            let generation = state.generation();
            state.timers.insert(TimerSlot {
                generation,
                armed: None,
                repeat: Duration::ZERO,
                callback: None,
            })
        };

        Self { core, key }
    }

    /// Arms the timer to fire after `timeout`, then every `repeat` if it is
    /// non-zero. Restarting an armed timer replaces its schedule and callback.
    pub fn start<F>(&self, callback: F, timeout: Duration, repeat: Duration)
    where
        F: FnMut() + Send + 'static,
    {
        let previous = {
            let mut state = self.core.state.lock();
            let seq = state.seq();
            let deadline = Deadline {
                at: Instant::now() + timeout,
                seq,
                key: self.key,
            };

            let slot = &mut state.timers[self.key];
            slot.armed = Some(seq);
            slot.repeat = repeat;
            let previous = slot.callback.replace(Box::new(callback));

            state.deadlines.push(std::cmp::Reverse(deadline));
            self.core.cond.notify_all();
            previous
        };

        drop(previous);
    }

    /// Disarms the timer. Stopping from inside the timer's own callback
    /// prevents it from being re-armed.
    pub fn stop(&self) {
        let callback = {
            let mut state = self.core.state.lock();
            let slot = &mut state.timers[self.key];
            slot.armed = None;
            slot.callback.take()
        };

        drop(callback);
    }

    pub fn is_active(&self) -> bool {
        self.core.state.lock().timers[self.key].armed.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let slot = self.core.state.lock().timers.try_remove(self.key);
        drop(slot);

        self.core.cond.notify_all();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
