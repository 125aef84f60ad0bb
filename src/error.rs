//! # Errors
//!
//! Two tiers. [`Errno`] values are ordinary, recoverable results handed back
//! to the caller. [`FatalError`] describes a broken scheduler invariant; it
//! is never returned, only passed to [`fatal`], which stops the system.

use core::fmt;

use crate::task::{Pid, TaskState};

/// Recoverable error codes returned by the kernel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted on this task (e.g. deleting the idle task).
    EPERM = 1,
    /// No task with the given pid.
    ESRCH = 3,
    /// A blocking wait was interrupted by a signal.
    EINTR = 4,
    /// Resource temporarily unavailable (pid table or semaphore pool full,
    /// or a non-blocking wait on an unavailable semaphore).
    EAGAIN = 11,
    /// The object is still in use.
    EBUSY = 16,
    /// Malformed argument or invalid semaphore handle.
    EINVAL = 22,
    /// Posting would exceed the semaphore's maximum value.
    EOVERFLOW = 75,
}

impl Errno {
    /// The POSIX numeric value of this error.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Symbolic name of the error, as used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Errno::EPERM => "EPERM",
            Errno::ESRCH => "ESRCH",
            Errno::EINTR => "EINTR",
            Errno::EAGAIN => "EAGAIN",
            Errno::EBUSY => "EBUSY",
            Errno::EINVAL => "EINVAL",
            Errno::EOVERFLOW => "EOVERFLOW",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal invariant violations. Any of these means the scheduler state can
/// no longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// A task was blocked while outside the ready-to-run range.
    BlockFromState(Pid, TaskState),
    /// A blocking call was made from interrupt context.
    WaitInInterrupt,
    /// A task-context operation ran before any task was dispatched.
    NoRunningTask,
    /// The ready list became empty.
    EmptyReadyList,
    /// A saved context failed validation on resume.
    CorruptContext(Pid),
    /// The pid table filled up while the system was being brought up.
    PidExhaustedAtBoot,
    /// A scheduler list referenced a pid with no TCB behind it.
    DanglingPid(Pid),
    /// A list insert exceeded its capacity.
    ListOverflow,
    /// The idle task tried to block or exit.
    IdleTaskStopped,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::BlockFromState(pid, state) => {
                write!(f, "attempt to block task {} in state {:?}", pid, state)
            }
            FatalError::WaitInInterrupt => f.write_str("blocking wait from interrupt context"),
            FatalError::NoRunningTask => f.write_str("no running task"),
            FatalError::EmptyReadyList => f.write_str("ready list is empty"),
            FatalError::CorruptContext(pid) => write!(f, "corrupt saved context for task {}", pid),
            FatalError::PidExhaustedAtBoot => f.write_str("pid table exhausted during bring-up"),
            FatalError::DanglingPid(pid) => write!(f, "list entry {} has no task", pid),
            FatalError::ListOverflow => f.write_str("task list overflow"),
            FatalError::IdleTaskStopped => f.write_str("idle task may not block or exit"),
        }
    }
}

/// Stop the system on an invariant violation.
///
/// Logs the reason and panics; the firmware's panic handler halts the core.
#[cold]
#[track_caller]
pub fn fatal(err: FatalError) -> ! {
    log::error!("kernel panic: {}", err);
    panic!("kernel panic: {}", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_codes() {
        assert_eq!(Errno::EINTR.code(), 4);
        assert_eq!(Errno::EINVAL.code(), 22);
        assert_eq!(Errno::EAGAIN.as_str(), "EAGAIN");
    }

    #[test]
    #[should_panic(expected = "kernel panic: ready list is empty")]
    fn test_fatal_panics() {
        fatal(FatalError::EmptyReadyList);
    }
}
