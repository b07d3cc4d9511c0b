#![allow(unused)]

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::TaskFailure;
use crate::runner::{ExceptionHandler, HandleScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    HandleException,
    OpenScope,
    CloseScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    HandleException { failure: TaskFailure },
    OpenScope { scope: Option<HandleScopeId> },
    CloseScope { scope: HandleScopeId },
}

/// Records calls made into test doubles, keyed by method.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::HandleException, Vec::new());
        map.insert(Method::OpenScope, Vec::new());
        map.insert(Method::CloseScope, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }

    /// Blocks until at least `expected` calls to `method` were recorded.
    pub(crate) fn wait_for_calls(&self, method: &Method, expected: usize) -> bool {
        super::wait_until(Duration::from_secs(5), || {
            self.num_calls(method) >= expected
        })
    }

    /// An exception handler recording every failure it receives.
    pub(crate) fn exception_handler(&self) -> ExceptionHandler {
        let tracker = self.clone();
        Arc::new(move |failure: &TaskFailure| {
            tracker.record(
                Method::HandleException,
                Call::HandleException {
                    failure: failure.clone(),
                },
            );
        })
    }

    pub(crate) fn failures(&self) -> Vec<TaskFailure> {
        self.get_calls(&Method::HandleException)
            .into_iter()
            .filter_map(|call| match call {
                Call::HandleException { failure } => Some(failure),
                _ => None,
            })
            .collect()
    }
}
