use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use crate::event_loop::{Async, EventLoop, LoopHandle, RunMode};

/// A thread driving an [`EventLoop`] until stopped, standing in for an
/// embedder's UI or engine thread.
pub(crate) struct LoopThread {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub(crate) fn spawn(name: &str) -> Self {
        Self::spawn_with(name, |_| ()).0
    }

    /// Runs `init` on the loop thread before the loop starts and hands its
    /// result back.
    pub(crate) fn spawn_with<T, F>(name: &str, init: F) -> (Self, T)
    where
        T: Send + 'static,
        F: FnOnce(&LoopHandle) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let event_loop = EventLoop::new();
                let handle = event_loop.handle();

                // Keeps `RunMode::Default` from returning until stopped.
                let _keepalive = Async::new(&handle, || {});

                let value = init(&handle);
                tx.send((handle, value)).unwrap();

                event_loop.run(RunMode::Default);
            })
            .unwrap();

        let (handle, value) = rx.recv().unwrap();
        (
            Self {
                handle,
                thread: Some(thread),
            },
            value,
        )
    }

    pub(crate) fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.owner()
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.stop();
            thread.join().unwrap();
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
