use std::marker::PhantomData;

/// Runs a closure when it goes out of scope.
///
/// The closure runs on normal exit, on early return and while unwinding from
/// a panic. Runners rely on this to signal a blocked caller even when the
/// task it is waiting on panics, or when the task is dropped without ever
/// being executed.
///
/// A guard moved into a `'static` closure is `Send` as long as the wrapped
/// closure is.
///
/// ```ignore
/// let done = Arc::new(AtomicBool::new(false));
/// {
///     let flag = done.clone();
///     let _guard = ScopeGuard::new(move || flag.store(true, Ordering::Release));
///     assert!(!done.load(Ordering::Acquire));
/// }
/// assert!(done.load(Ordering::Acquire));
/// ```
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // Taken exactly once, by `drop`.
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic;

    #[test]
    fn test_guard_runs_on_scope_exit() {
        let hits = Cell::new(0);
        {
            let _guard = ScopeGuard::new(|| hits.set(hits.get() + 1));
            assert_eq!(hits.get(), 0);
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_guard_runs_while_unwinding() {
        let hits = Cell::new(0);
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = ScopeGuard::new(|| hits.set(hits.get() + 1));
            panic!("boom");
        }));

        assert!(res.is_err());
        assert_eq!(hits.get(), 1);
    }
}
