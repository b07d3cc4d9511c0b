use std::sync::Arc;

use super::{LoopCore, LoopHandle};

pub(super) type AsyncCallback = Arc<dyn Fn() + Send + Sync>;

pub(super) struct AsyncSlot {
    pub(super) generation: u64,
    pub(super) pending: bool,
    pub(super) callback: AsyncCallback,
}

/// Cross-thread wake handle.
///
/// [`send`](Async::send) may be called from any thread. The callback runs on
/// the loop thread during the next iteration; several sends issued before
/// that iteration are coalesced into a single invocation.
///
/// An open handle keeps the loop alive. Dropping it unregisters the callback.
pub struct Async {
    core: Arc<LoopCore>,
    key: usize,
    generation: u64,
}

impl Async {
    pub fn new<F>(handle: &LoopHandle, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let core = handle.core.clone();
        let (key, generation) = {
            let mut state = core.state.lock();
            let generation = state.generation();
            let key = state.asyncs.insert(AsyncSlot {
                generation,
                pending: false,
                callback: Arc::new(callback),
            });
            (key, generation)
        };

        Self {
            core,
            key,
            generation,
        }
    }

    pub fn send(&self) {
        let mut state = self.core.state.lock();
        let Some(slot) = state.asyncs.get_mut(self.key) else {
            return;
        };

        if !slot.pending {
            slot.pending = true;
            state.pending.push_back((self.key, self.generation));
            self.core.cond.notify_all();
        }
    }
}

impl Drop for Async {
    fn drop(&mut self) {
        let slot = {
            let mut state = self.core.state.lock();
            state.asyncs.try_remove(self.key)
        };

        // A callback that is currently dispatching holds its own clone, the
        // closure itself is released here without the lock held.
        drop(slot);

        // Closing the last handle may leave a `Default` run with nothing to
        // wait for.
        self.core.cond.notify_all();
    }
}

impl std::fmt::Debug for Async {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Async")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}
