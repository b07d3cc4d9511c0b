use std::sync::Once;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

pub(crate) mod loop_thread;
pub(crate) use loop_thread::LoopThread;

pub(crate) mod spy;
pub(crate) use spy::{Call, Method, Tracker};

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per process. `RUST_LOG`
/// overrides the default `warn` filter.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Polls `cond` until it holds or `timeout` elapses. Returns the last
/// observed value.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
