//! # Task Control Block
//!
//! Defines the task model for Kestrel. A TCB carries everything the
//! scheduler needs to place a task in a list, order it by priority, block it
//! on a semaphore, and hand its saved context to the architecture port.
//!
//! TCBs are not linked to each other. Which list a task sits in is recorded
//! by the queue manager as a sequence of [`Pid`]s, and the task's
//! [`TaskState`] names that list.

use core::fmt;

use crate::config::{DEFAULT_TIME_SLICE, IDLE_PRIORITY, MAX_TASKS};
use crate::error::Errno;
use crate::semaphore::SemId;
use crate::signal::SigDeliver;

/// Task entry point. The argument is passed in the first argument register.
/// Returning from the entry terminates the task.
pub type TaskEntry = extern "C" fn(usize);

// ---------------------------------------------------------------------------
// Process id
// ---------------------------------------------------------------------------

/// Process id. Unique among live tasks; also the handle into the task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u16);

impl Pid {
    /// The idle task's pid.
    pub const IDLE: Pid = Pid(0);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Pid(raw)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Index of this pid's slot in the registry hash table.
    #[inline]
    pub const fn slot(self) -> usize {
        self.0 as usize & (MAX_TASKS - 1)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Why a blocked task is waiting. Each reason has its own blocked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Semaphore,
    Signal,
    MqNotEmpty,
    MqNotFull,
}

impl BlockReason {
    pub const COUNT: usize = 4;

    pub const ALL: [BlockReason; Self::COUNT] = [
        BlockReason::Semaphore,
        BlockReason::Signal,
        BlockReason::MqNotEmpty,
        BlockReason::MqNotFull,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Execution state of a task.
///
/// ```text
///  Invalid ──create──► Inactive ──activate──► Ready ◄──────► Running
///                         ▲                    ▲  ▲             │
///                         │                    │  │ merge       │ block
///                         │                    │ Pending        ▼
///                      exit/delete             └──wake──── Blocked(reason)
/// ```
///
/// Only the running task blocks itself. Any state except `Invalid` can be
/// torn down; teardown passes through `Inactive` before the slot is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot being populated, not yet in any list.
    Invalid,
    /// Created but not activated, or terminating.
    Inactive,
    /// Readied from interrupt context (or under the scheduler lock), waiting
    /// to be merged into the ready list.
    Pending,
    /// In the ready list, not running.
    Ready,
    /// Head of the ready list with its context loaded.
    Running,
    /// In the blocked list for the given reason.
    Blocked(BlockReason),
}

impl TaskState {
    /// Running or ready: the only states a task may be blocked from.
    #[inline]
    pub const fn is_ready_to_run(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Running)
    }

    #[inline]
    pub const fn is_blocked(self) -> bool {
        matches!(self, TaskState::Blocked(_))
    }
}

/// Scheduling policy among tasks of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Runs until it blocks, yields, or is preempted by a higher priority.
    Fifo,
    /// Additionally rotated behind its equals when its time slice expires.
    RoundRobin,
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static configuration for a task, set at creation time.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Base priority (higher = more important). 0 is reserved for idle.
    pub priority: u8,

    /// Policy among equal-priority tasks.
    pub policy: SchedPolicy,

    /// Time slice in ticks for this task. If 0, uses `DEFAULT_TIME_SLICE`.
    pub time_slice: u32,
}

impl TaskConfig {
    /// Round-robin task at `priority` with the default quantum.
    pub const fn with_priority(priority: u8) -> Self {
        Self {
            priority,
            policy: SchedPolicy::RoundRobin,
            time_slice: 0,
        }
    }

    /// Returns the effective time slice, falling back to the system default.
    #[inline]
    pub const fn effective_time_slice(&self) -> u32 {
        if self.time_slice > 0 {
            self.time_slice
        } else {
            DEFAULT_TIME_SLICE
        }
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// `C` is the architecture port's saved-context type. The portable scheduler
/// never looks inside it.
pub struct TaskControlBlock<C> {
    /// Process id, fixed for the task's lifetime.
    pub pid: Pid,

    /// Current execution state; names the list the task is in.
    pub state: TaskState,

    /// Priority assigned by the task's creator or `set_priority`.
    pub base_priority: u8,

    /// Effective priority. Exceeds `base_priority` while the task holds a
    /// semaphore a higher-priority task is waiting on.
    pub sched_priority: u8,

    pub policy: SchedPolicy,

    /// Round-robin quantum in ticks.
    pub time_slice: u32,

    /// Ticks left in the current quantum.
    pub ticks_remaining: u32,

    pub entry: TaskEntry,
    pub arg: usize,

    /// Semaphore this task is blocked on, if any.
    pub wait_sem: Option<SemId>,

    /// Outcome stamped by whoever woke the task. `None` means a normal grant.
    pub wake_error: Option<Errno>,

    /// Signal delivery to run when the task is next resumed.
    pub sig_deliver: Option<SigDeliver>,

    /// Scheduler-lock nesting depth. The lock belongs to the task: it stays
    /// with it across a block and is dropped when the task exits.
    pub lockcount: u16,

    /// Saved execution context.
    pub context: C,
}

impl<C> TaskControlBlock<C> {
    /// Build a TCB for a freshly assigned pid. The task starts `Invalid`;
    /// the scheduler moves it to `Inactive` once it is listed.
    pub fn new(pid: Pid, config: TaskConfig, entry: TaskEntry, arg: usize, context: C) -> Self {
        let time_slice = config.effective_time_slice();
        Self {
            pid,
            state: TaskState::Invalid,
            base_priority: config.priority,
            sched_priority: config.priority,
            policy: config.policy,
            time_slice,
            ticks_remaining: time_slice,
            entry,
            arg,
            wait_sem: None,
            wake_error: None,
            sig_deliver: None,
            lockcount: 0,
            context,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pid == Pid::IDLE
    }

    /// Whether the effective priority is currently raised by inheritance.
    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.sched_priority > self.base_priority
    }

    /// Restart the round-robin quantum.
    #[inline]
    pub fn reset_time_slice(&mut self) {
        self.ticks_remaining = self.time_slice;
    }
}

/// Configuration of the idle task.
pub(crate) const IDLE_CONFIG: TaskConfig = TaskConfig {
    priority: IDLE_PRIORITY,
    policy: SchedPolicy::Fifo,
    time_slice: 0,
};

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
