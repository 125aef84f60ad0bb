//! # Task teardown
//!
//! Deleting a task and a task exiting on its own share one path: take the
//! task out of every structure that can name it, free its pid and context,
//! then pick the next task to run.

use crate::arch::ContextSwitch;
use crate::error::{fatal, Errno, FatalError};
use crate::scheduler::Scheduler;
use crate::task::{Pid, TaskState};

impl<A: ContextSwitch> Scheduler<A> {
    /// Terminate `pid`, whatever state it is in.
    pub fn delete_task(&mut self, pid: Pid) -> Result<(), Errno> {
        let tcb = self.tasks.get(pid).ok_or(Errno::ESRCH)?;
        if tcb.is_idle() {
            return Err(Errno::EPERM);
        }
        self.teardown(pid);
        Ok(())
    }

    /// Terminate the running task. The caller never runs again once the
    /// port completes the switch.
    pub fn exit_current(&mut self) {
        let pid = self.current_or_fatal();
        if pid == Pid::IDLE {
            fatal(FatalError::IdleTaskStopped);
        }
        self.teardown(pid);
    }

    fn teardown(&mut self, pid: Pid) {
        let state = self.tcb(pid).state;
        if state.is_blocked() {
            self.cancel_sem_wait(pid);
        }
        self.detach(pid);
        self.tcb_mut(pid).state = TaskState::Inactive;
        self.forget_holder(pid);

        if self.running == Some(pid) {
            // Any scheduler lock it held leaves with its TCB.
            self.running = None;
        }

        if let Some(tcb) = self.tasks.remove(pid) {
            self.arch.release(tcb.context);
        }
        log::debug!("task {} terminated from {:?}", pid, state);
        self.reschedule();
    }
}
