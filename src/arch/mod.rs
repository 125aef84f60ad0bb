//! # Architecture Abstraction Layer
//!
//! The context-switch boundary. The portable scheduler decides *which* task
//! runs; a port decides *how* its registers and stack are saved and loaded.
//! The scheduler never looks inside a saved context.
//!
//! Two ports ship with the crate:
//! - [`cortex_m4`]: PendSV-deferred switching on ARMv7E-M (target builds).
//! - [`sim`]: a host port that records every switch, used by the unit tests.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(any(test, not(target_arch = "arm")))]
pub mod sim;

use crate::signal::SigDeliver;
use crate::task::{Pid, TaskEntry};

/// Port selected for the global kernel instance.
#[cfg(target_arch = "arm")]
pub use cortex_m4::CortexM4 as Port;

#[cfg(not(target_arch = "arm"))]
pub use sim::SimPort as Port;

/// Platform primitives the scheduler consumes.
///
/// Every method is called with interrupts disabled. A port may complete the
/// switch later (Cortex-M4 defers it to PendSV) as long as no other task code
/// runs in between.
pub trait ContextSwitch {
    /// Saved execution state of one task.
    type Context;

    /// Prepare the context of a freshly created task so that resuming it
    /// calls `entry(arg)`.
    fn initial_state(&mut self, pid: Pid, entry: TaskEntry, arg: usize) -> Self::Context;

    /// Record where the running task's state must be stored when it leaves
    /// the CPU.
    fn save_and_suspend(&mut self, ctx: &mut Self::Context);

    /// Make `ctx` the next context to run. A pending signal delivery, if
    /// any, runs before the task's own code continues.
    ///
    /// A context that fails validation is a fatal error.
    fn resume(&mut self, ctx: &mut Self::Context, deliver: Option<SigDeliver>);

    /// Give back whatever the context owns (stack slot, bookkeeping).
    fn release(&mut self, ctx: Self::Context);

    /// Whether the caller is running in interrupt (handler) context.
    fn in_interrupt(&self) -> bool;

    /// Ask for a scheduling point once the current interrupt returns, so the
    /// pending list gets merged. Ports without deferred switching ignore it.
    fn request_reschedule(&mut self) {}

    /// Hand back a delivery passed to `resume` that has not run yet, with the
    /// pid it was meant for. Ports that run deliveries inside `resume` never
    /// have one.
    fn take_pending_delivery(&mut self) -> Option<(SigDeliver, Pid)> {
        None
    }
}
