use anyhow::Result;

/// Scheduling classes a runner thread can ask the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    Background,
    Default,
    /// Work the user is actively waiting on: input handling, layout, script
    /// execution driving the UI.
    UserInteractive,
}

impl ThreadPriority {
    // Linux maps scheduling classes onto nice values. Lowering the nice value
    // below 0 needs CAP_SYS_NICE or a permissive RLIMIT_NICE.
    #[cfg(target_os = "linux")]
    fn nice_value(self) -> libc::c_int {
        match self {
            ThreadPriority::Background => 10,
            ThreadPriority::Default => 0,
            ThreadPriority::UserInteractive => -10,
        }
    }
}

/// Changes the scheduling priority of the calling thread.
///
/// On Linux `setpriority(PRIO_PROCESS, tid, ..)` applies to a single thread
/// when given a kernel thread id.
#[cfg(target_os = "linux")]
pub(crate) fn set_current_thread_priority(priority: ThreadPriority) -> Result<()> {
    use anyhow::Context;
    use std::io;

    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, priority.nice_value()) };

    if ret != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("setpriority({:?}) failed for thread {}", priority, tid));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_current_thread_priority(priority: ThreadPriority) -> Result<()> {
    Err(anyhow::anyhow!(
        "thread priority {:?} is not supported on this platform",
        priority
    ))
}

/// Name of the calling thread, or `"<unnamed>"`.
pub(crate) fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}
