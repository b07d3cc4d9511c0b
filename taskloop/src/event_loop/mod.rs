//! A minimal single-threaded event loop.
//!
//! The loop owns two kinds of handles: [`Async`] wake handles, which other
//! threads signal to get a callback invoked on the loop thread, and
//! [`Timer`]s. Handle state lives in slabs behind a single mutex; the loop
//! thread parks on a condvar until the next timer deadline or until a handle
//! is signalled.
//!
//! Callbacks are always invoked on the owner thread with the state lock
//! released, so they may create, start, stop or drop any handle, including
//! the one currently firing.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use slab::Slab;

mod async_handle;
pub use async_handle::Async;
use async_handle::AsyncSlot;

mod timer;
pub use timer::Timer;
use timer::{Deadline, TimerCallback, TimerSlot};


/// How long [`EventLoop::run`] keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until stopped or until no active handles remain.
    Default,
    /// Block until at least one event was processed, then return.
    Once,
    /// Process whatever is ready and return without blocking.
    NoWait,
}

/// An event loop bound to the thread that created it.
///
/// `EventLoop` itself is `!Send`: only the owner thread can drive it. Other
/// threads interact with it through a [`LoopHandle`].
pub struct EventLoop {
    core: Arc<LoopCore>,

    _not_send: PhantomData<*const ()>,
}

impl EventLoop {
    pub fn new() -> Self {
        let core = LoopCore {
            owner: thread::current().id(),
            state: Mutex::new(LoopState::new()),
            cond: Condvar::new(),
        };

        Self {
            core: Arc::new(core),
            _not_send: PhantomData,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            core: self.core.clone(),
        }
    }

    /// Drives the loop according to `mode`.
    ///
    /// Each iteration fires due timers in deadline order, then dispatches
    /// signalled async handles. Returns `true` if active handles remain.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread other than the one that created the
    /// loop.
    pub fn run(&self, mode: RunMode) -> bool {
        assert!(
            self.core.is_on_loop_thread(),
            "EventLoop::run called from {:?}, loop is owned by {:?}",
            thread::current().id(),
            self.core.owner
        );

        loop {
            let mut did_work = self.core.fire_due_timers();
            did_work |= self.core.dispatch_asyncs();

            let mut state = self.core.state.lock();
            let alive = state.is_alive();

            if state.stop_requested {
                state.stop_requested = false;
                return alive;
            }

            match mode {
                RunMode::NoWait => return alive,
                RunMode::Once if did_work => return alive,
                _ if !alive => return false,
                _ => {}
            }

            if !state.pending.is_empty() {
                continue;
            }

            match state.next_deadline() {
                Some(at) if at <= Instant::now() => continue,
                Some(at) => {
                    self.core.cond.wait_until(&mut state, at);
                }
                None => self.core.cond.wait(&mut state),
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("owner", &self.core.owner)
            .finish()
    }
}

/// Thread-safe reference to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    core: Arc<LoopCore>,
}

impl LoopHandle {
    /// Asks the loop to return from [`EventLoop::run`] after the current
    /// iteration. Wakes the loop if it is blocked.
    ///
    /// A stop requested while the loop is not running applies to the next
    /// call to `run`.
    pub fn stop(&self) {
        let mut state = self.core.state.lock();
        state.stop_requested = true;
        self.core.cond.notify_all();
    }

    pub fn owner(&self) -> ThreadId {
        self.core.owner
    }

    pub fn is_on_loop_thread(&self) -> bool {
        self.core.is_on_loop_thread()
    }

    /// Whether any async handle is open or any timer is armed.
    pub fn is_alive(&self) -> bool {
        self.core.state.lock().is_alive()
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("owner", &self.core.owner)
            .finish()
    }
}

struct LoopCore {
    owner: ThreadId,
    state: Mutex<LoopState>,
    cond: Condvar,
}

impl LoopCore {
    fn is_on_loop_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fires every timer whose deadline passed before this call, one at a
    /// time, releasing the lock around each callback.
    fn fire_due_timers(&self) -> bool {
        let now = Instant::now();
        let mut fired = false;

        loop {
            let Some(mut due) = self.state.lock().pop_due_timer(now) else {
                break;
            };

            fired = true;
            (due.callback)();

            let unused = self.state.lock().restore_timer_callback(due);
            drop(unused);
        }

        fired
    }

    fn dispatch_asyncs(&self) -> bool {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let mut dispatched = false;

        for (key, generation) in pending {
            let callback = {
                let mut state = self.state.lock();
                match state.asyncs.get_mut(key) {
                    Some(slot) if slot.generation == generation && slot.pending => {
                        slot.pending = false;
                        slot.callback.clone()
                    }
                    _ => continue,
                }
            };

            dispatched = true;
            callback();
        }

        dispatched
    }
}

struct LoopState {
    asyncs: Slab<AsyncSlot>,

    timers: Slab<TimerSlot>,

    // Min-heap of timer deadlines. Entries of stopped or re-armed timers are
    // left in place and skipped when popped.
    deadlines: BinaryHeap<Reverse<Deadline>>,

    // Signalled async handles in signal order.
    pending: VecDeque<(usize, u64)>,

    next_generation: u64,

    next_seq: u64,

    stop_requested: bool,
}

impl LoopState {
    fn new() -> Self {
        Self {
            asyncs: Slab::new(),
            timers: Slab::new(),
            deadlines: BinaryHeap::new(),
            pending: VecDeque::new(),
            next_generation: 0,
            next_seq: 0,
            stop_requested: false,
        }
    }

    fn is_alive(&self) -> bool {
        !self.asyncs.is_empty() || self.timers.iter().any(|(_, t)| t.armed.is_some())
    }

    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn is_stale(&self, deadline: &Deadline) -> bool {
        self.timers
            .get(deadline.key)
            .is_none_or(|slot| slot.armed != Some(deadline.seq))
    }

    /// Earliest live deadline, discarding stale heap entries on the way.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.deadlines.peek() {
            if !self.is_stale(top) {
                return Some(top.at);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Pops the next live timer due at `now`, disarming one-shot timers and
    /// re-arming repeating ones before handing out the callback.
    fn pop_due_timer(&mut self, now: Instant) -> Option<DueTimer> {
        while let Some(Reverse(top)) = self.deadlines.peek() {
            if top.at > now {
                return None;
            }

            let Some(Reverse(deadline)) = self.deadlines.pop() else {
                return None;
            };
            if self.is_stale(&deadline) {
                continue;
            }

            let seq = self.seq();
            let slot = &mut self.timers[deadline.key];
            let Some(callback) = slot.callback.take() else {
                slot.armed = None;
                continue;
            };

            let rearmed = if slot.repeat.is_zero() {
                slot.armed = None;
                None
            } else {
                slot.armed = Some(seq);
                Some(Deadline {
                    at: now + slot.repeat,
                    seq,
                    key: deadline.key,
                })
            };

            let generation = slot.generation;
            if let Some(next) = rearmed {
                self.deadlines.push(Reverse(next));
            }

            return Some(DueTimer {
                key: deadline.key,
                generation,
                rearmed_seq: rearmed.map(|d| d.seq),
                callback,
            });
        }

        None
    }

    /// Puts a repeating timer's callback back unless the timer was stopped,
    /// restarted or closed while the callback ran. Returns the callback when
    /// it is no longer needed so the caller can drop it unlocked.
    fn restore_timer_callback(&mut self, due: DueTimer) -> Option<TimerCallback> {
        let Some(seq) = due.rearmed_seq else {
            return Some(due.callback);
        };

        match self.timers.get_mut(due.key) {
            Some(slot)
                if slot.generation == due.generation
                    && slot.armed == Some(seq)
                    && slot.callback.is_none() =>
            {
                slot.callback = Some(due.callback);
                None
            }
            _ => Some(due.callback),
        }
    }
}

struct DueTimer {
    key: usize,
    generation: u64,
    rearmed_seq: Option<u64>,
    callback: TimerCallback,
}
