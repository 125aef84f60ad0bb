//! # Kernel
//!
//! Top-level kernel initialization and public API for Kestrel.
//!
//! The kernel owns the single global scheduler and exposes the task,
//! priority, semaphore and signal calls application code uses. Every call
//! runs inside a critical section; blocking calls leave the critical section
//! before the port completes the switch.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()         ← Install the idle task
//!         ├─► kernel::create_task()  ← Register tasks (×N)
//!         └─► kernel::start()        ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Dispatch the highest-priority task via PendSV
//! ```
//!
//! ## Blocking calls
//!
//! `sem_wait` runs in two steps. The first critical section either takes the
//! semaphore or blocks the caller and pends PendSV. PendSV fires as soon as
//! interrupts are re-enabled, so the caller stops there. When it is resumed
//! it enters a second critical section to collect the outcome stamped by
//! whoever woke it.

use core::cell::RefCell;

#[cfg(target_arch = "arm")]
use crate::arch::ContextSwitch;
use crate::arch::Port;
use crate::error::Errno;
use crate::scheduler::{Scheduler, WaitStatus};
use crate::semaphore::{SemId, SemProtocol};
use crate::signal::SigDeliver;
use crate::sync::{self, KernelCell};
use crate::task::{Pid, TaskConfig, TaskEntry};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static SCHEDULER: KernelCell<Scheduler<Port>> =
    KernelCell::new(RefCell::new(Scheduler::new(Port::new())));

/// Run `f` on the global scheduler with interrupts disabled.
pub fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler<Port>) -> R,
{
    sync::with_cell(&SCHEDULER, f)
}

fn wait_for_interrupt() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::wfi();
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}

extern "C" fn idle_task(_: usize) {
    loop {
        wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the Kestrel kernel by installing the idle task.
///
/// Must be called before any other kernel function. Calling it again has
/// no effect.
pub fn init() {
    with_scheduler(|s| {
        if s.task(Pid::IDLE).is_none() {
            s.boot(idle_task);
        }
    });
}

/// Create a round-robin task at `priority` and make it runnable.
///
/// # Returns
/// - `Ok(pid)`: the new task's process id.
/// - `Err(EINVAL)`: `priority` is the reserved idle priority.
/// - `Err(EAGAIN)`: the pid table is full.
pub fn create_task(priority: u8, entry: TaskEntry, arg: usize) -> Result<Pid, Errno> {
    spawn_task(TaskConfig::with_priority(priority), entry, arg)
}

/// Create a task with full configuration and make it runnable.
pub fn spawn_task(config: TaskConfig, entry: TaskEntry, arg: usize) -> Result<Pid, Errno> {
    with_scheduler(|s| s.spawn(config, entry, arg))
}

pub fn delete_task(pid: Pid) -> Result<(), Errno> {
    with_scheduler(|s| s.delete_task(pid))
}

/// Terminate the calling task. Also the return path of every task entry.
pub fn exit() -> ! {
    with_scheduler(|s| s.exit_current());
    loop {
        wait_for_interrupt();
    }
}

/// Pid of the calling task, `None` before the scheduler starts.
pub fn getpid() -> Option<Pid> {
    with_scheduler(|s| s.current())
}

pub fn set_priority(pid: Pid, priority: u8) -> Result<(), Errno> {
    with_scheduler(|s| s.set_priority(pid, priority))
}

/// Effective priority of `pid`, including any inherited boost.
pub fn get_priority(pid: Pid) -> Result<u8, Errno> {
    with_scheduler(|s| s.priority(pid))
}

/// Give the CPU to the next ready task of the same priority, if any.
pub fn yield_task() {
    with_scheduler(|s| s.yield_current());
}

/// Disable preemption. Interrupts stay enabled. Nests.
pub fn sched_lock() {
    with_scheduler(|s| s.sched_lock());
}

pub fn sched_unlock() {
    with_scheduler(|s| s.sched_unlock());
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

/// Create a semaphore with the kernel's default protocol.
pub fn sem_init(count: i16) -> Result<SemId, Errno> {
    sem_init_with(count, SemProtocol::default())
}

pub fn sem_init_with(count: i16, protocol: SemProtocol) -> Result<SemId, Errno> {
    with_scheduler(|s| s.sem_init(count, protocol))
}

pub fn sem_destroy(id: SemId) -> Result<(), Errno> {
    with_scheduler(|s| s.sem_destroy(id))
}

pub fn sem_reset(id: SemId, count: i16) -> Result<(), Errno> {
    with_scheduler(|s| s.sem_reset(id, count))
}

/// Take one unit, blocking until one is available.
///
/// # Returns
/// - `Ok(())`: the caller holds the semaphore.
/// - `Err(EINVAL)`: `id` does not name a live semaphore.
/// - `Err(EINTR)`: the wait was interrupted by a signal.
pub fn sem_wait(id: SemId) -> Result<(), Errno> {
    match with_scheduler(|s| s.sem_wait(id))? {
        WaitStatus::Acquired => Ok(()),
        WaitStatus::Blocked => with_scheduler(|s| s.wait_result()),
    }
}

pub fn sem_trywait(id: SemId) -> Result<(), Errno> {
    with_scheduler(|s| s.sem_trywait(id))
}

/// Release one unit. Safe to call from interrupt handlers.
pub fn sem_post(id: SemId) -> Result<(), Errno> {
    with_scheduler(|s| s.sem_post(id))
}

pub fn sem_getvalue(id: SemId) -> Result<i16, Errno> {
    with_scheduler(|s| s.sem_getvalue(id))
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Block the calling task until it is signalled.
pub fn sig_wait() -> Result<(), Errno> {
    with_scheduler(|s| s.sig_wait())?;
    with_scheduler(|s| s.wait_result())
}

pub fn signal(pid: Pid, deliver: Option<SigDeliver>) -> Result<(), Errno> {
    with_scheduler(|s| s.signal(pid, deliver))
}

/// Abort `pid`'s semaphore wait with `EINTR`. Returns false if it was not
/// waiting (for instance because a post got there first).
pub fn interrupt_wait(pid: Pid) -> bool {
    with_scheduler(|s| s.interrupt_wait(pid))
}

// ---------------------------------------------------------------------------
// Port hooks
// ---------------------------------------------------------------------------

/// Timer tick, called from SysTick.
pub fn tick() {
    with_scheduler(|s| s.tick());
}

/// Start the Kestrel scheduler. **Does not return.**
///
/// Masks interrupts, configures the SysTick timer and interrupt priorities,
/// and dispatches the highest-priority ready task.
///
/// # Panics
/// If `init()` has not been called (the ready list is empty).
#[cfg(target_arch = "arm")]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    // The first dispatch pends PendSV, which must not run before `launch`
    // has pointed PSP at the scratch frame. `launch` unmasks interrupts.
    cortex_m::interrupt::disable();

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    with_scheduler(|s| s.start());

    // Safety: called once from Thread mode with priorities configured and
    // interrupts masked.
    unsafe { cortex_m4::launch() }
}

/// Scheduling point run by PendSV: merge pending tasks, pick the next task
/// and hand its saved stack pointer to the assembly.
///
/// A signal delivery for the incoming task runs after the critical section
/// is left, still inside PendSV.
#[cfg(target_arch = "arm")]
pub(crate) fn service_context_switch(psp: *mut u32) -> *mut u32 {
    // Only the task actually switched in can still own the delivery slot.
    let (sp, delivery) = with_scheduler(|s| {
        s.reschedule();
        let sp = s.arch_mut().complete_switch(psp);
        (sp, s.arch_mut().take_pending_delivery())
    });
    if let Some((deliver, pid)) = delivery {
        deliver(pid);
    }
    sp
}
