//! # Signal interruption of waits
//!
//! The signal subsystem proper lives outside the kernel core. What the core
//! provides is the wake-up side: interrupting a blocked wait with `EINTR`,
//! waking a task parked in a signal wait, and scheduling a delivery callback
//! to run when the target is next resumed.

use crate::arch::ContextSwitch;
use crate::error::Errno;
use crate::scheduler::Scheduler;
use crate::task::{BlockReason, Pid, TaskState};

/// Delivery callback run on behalf of the signalled task before it continues.
pub type SigDeliver = fn(Pid);

impl<A: ContextSwitch> Scheduler<A> {
    /// Abort a semaphore wait with `EINTR`.
    ///
    /// Tolerates racing with a post: if the task is no longer blocked on a
    /// semaphore this does nothing and returns false.
    pub fn interrupt_wait(&mut self, pid: Pid) -> bool {
        match self.tasks.get(pid) {
            Some(tcb) if tcb.state == TaskState::Blocked(BlockReason::Semaphore) => {}
            _ => return false,
        }
        self.cancel_sem_wait(pid);
        self.tcb_mut(pid).wake_error = Some(Errno::EINTR);
        log::debug!("task {} wait interrupted", pid);
        if self.unblock_task(pid) {
            self.dispatch();
        }
        true
    }

    /// Signal `pid`, optionally with a delivery callback.
    ///
    /// A task in a semaphore or message-queue wait has the wait aborted with
    /// `EINTR`. A task in a signal wait is woken normally. A running task is
    /// suspended and resumed at once so the callback runs before it
    /// continues; a ready task runs it when next dispatched.
    pub fn signal(&mut self, pid: Pid, deliver: Option<SigDeliver>) -> Result<(), Errno> {
        let tcb = self.tasks.get_mut(pid).ok_or(Errno::ESRCH)?;
        if deliver.is_some() {
            tcb.sig_deliver = deliver;
        }

        let state = tcb.state;
        match state {
            TaskState::Blocked(BlockReason::Semaphore) => {
                self.interrupt_wait(pid);
            }
            TaskState::Blocked(BlockReason::MqNotEmpty | BlockReason::MqNotFull) => {
                tcb.wake_error = Some(Errno::EINTR);
                if self.unblock_task(pid) {
                    self.dispatch();
                }
            }
            TaskState::Blocked(BlockReason::Signal) => {
                tcb.wake_error = None;
                if self.unblock_task(pid) {
                    self.dispatch();
                }
            }
            TaskState::Running if !self.arch.in_interrupt() => {
                self.reclaim_delivery();
                if let Some(tcb) = self.tasks.get_mut(pid) {
                    if let Some(deliver) = tcb.sig_deliver.take() {
                        self.arch.save_and_suspend(&mut tcb.context);
                        self.arch.resume(&mut tcb.context, Some(deliver));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Park the running task until it is signalled.
    pub fn sig_wait(&mut self) -> Result<(), Errno> {
        self.block_current(BlockReason::Signal)
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

    use super::*;
    use crate::arch::sim::SwitchEvent;
    use crate::scheduler::tests::{fifo, started, work};
    use crate::scheduler::WaitStatus;
    use crate::semaphore::SemProtocol;

    // Interruption after a wait: the wait returns EINTR and the count is
    // back where it was before the wait.
    #[test]
    fn test_interrupted_wait_restores_count() {
        let mut s = started();
        let id = s.sem_init(0, SemProtocol::Inherit).unwrap();
        let w = s.spawn(fifo(5), work, 0).unwrap();
        assert_eq!(s.sem_wait(id), Ok(WaitStatus::Blocked));
        assert_eq!(s.sem_getvalue(id), Ok(-1));

        assert!(s.interrupt_wait(w));
        assert_eq!(s.sem_getvalue(id), Ok(0));
        assert_eq!(s.current(), Some(w));
        assert!(s.task(w).unwrap().wait_sem.is_none());
        assert_eq!(s.wait_result(), Err(Errno::EINTR));
        // The outcome is consumed.
        assert_eq!(s.wait_result(), Ok(()));
        s.assert_consistent();
    }

    #[test]
    fn test_interrupt_after_grant_is_noop() {
        let mut s = started();
        let id = s.sem_init(0, SemProtocol::None).unwrap();
        let w = s.spawn(fifo(5), work, 0).unwrap();
        s.sem_wait(id).unwrap();

        s.arch_mut().enter_interrupt();
        s.sem_post(id).unwrap();
        assert_eq!(s.state(w), Some(TaskState::Pending));
        assert!(!s.interrupt_wait(w));
        s.arch_mut().leave_interrupt();

        assert_eq!(s.state(w), Some(TaskState::Pending));
        assert_eq!(s.sem_getvalue(id), Ok(0));
        s.reschedule();
        assert_eq!(s.current(), Some(w));
        assert_eq!(s.wait_result(), Ok(()));
        s.assert_consistent();
    }

    #[test]
    fn test_interrupt_drops_inherited_priority() {
        let mut s = started();
        let holder = s.spawn(fifo(2), work, 0).unwrap();
        let id = s.sem_init(1, SemProtocol::Inherit).unwrap();
        s.sem_wait(id).unwrap();
        let w = s.spawn(fifo(9), work, 0).unwrap();
        s.sem_wait(id).unwrap();
        assert_eq!(s.priority(holder), Ok(9));

        assert!(s.interrupt_wait(w));
        assert_eq!(s.priority(holder), Ok(2));
        assert_eq!(s.current(), Some(w));
        assert_eq!(s.sem_getvalue(id), Ok(0));
        s.assert_consistent();
    }

    #[test]
    fn test_interrupt_from_isr_goes_pending() {
        let mut s = started();
        let id = s.sem_init(0, SemProtocol::None).unwrap();
        let w = s.spawn(fifo(5), work, 0).unwrap();
        s.sem_wait(id).unwrap();

        s.arch_mut().enter_interrupt();
        assert!(s.interrupt_wait(w));
        assert_eq!(s.state(w), Some(TaskState::Pending));
        s.arch_mut().leave_interrupt();
        s.reschedule();
        assert_eq!(s.wait_result(), Err(Errno::EINTR));
    }

    #[test]
    fn test_signal_wakes_signal_wait() {
        let mut s = started();
        let w = s.spawn(fifo(5), work, 0).unwrap();
        s.sig_wait().unwrap();
        assert_eq!(s.current(), Some(Pid::IDLE));
        s.signal(w, None).unwrap();
        assert_eq!(s.current(), Some(w));
        assert_eq!(s.wait_result(), Ok(()));
    }

    #[test]
    fn test_signal_interrupts_queue_wait() {
        let mut s = started();
        let w = s.spawn(fifo(5), work, 0).unwrap();
        s.block_current(BlockReason::MqNotEmpty).unwrap();
        s.signal(w, None).unwrap();
        assert_eq!(s.current(), Some(w));
        assert_eq!(s.wait_result(), Err(Errno::EINTR));
    }

    #[test]
    fn test_signal_unknown_pid() {
        let mut s = started();
        assert_eq!(s.signal(Pid::new(42), None), Err(Errno::ESRCH));
    }

    static DELIVERED: AtomicU16 = AtomicU16::new(u16::MAX);

    fn record(pid: Pid) {
        DELIVERED.store(pid.as_u16(), Ordering::SeqCst);
    }

    #[test]
    fn test_delivery_runs_once_on_resume() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        let b = s.spawn(fifo(3), work, 0).unwrap();
        s.signal(b, Some(record)).unwrap();
        assert!(s.task(b).unwrap().sig_deliver.is_some());

        s.sig_wait().unwrap();
        assert_eq!(s.current(), Some(b));
        assert_eq!(DELIVERED.load(Ordering::SeqCst), b.as_u16());
        assert!(s.task(b).unwrap().sig_deliver.is_none());
        assert!(s.arch().events().ends_with(&[
            SwitchEvent::Suspend(a),
            SwitchEvent::Resume(b),
            SwitchEvent::Deliver(b)
        ]));
    }

    static COUNTED: AtomicU32 = AtomicU32::new(0);

    fn count(_: Pid) {
        COUNTED.fetch_add(1, Ordering::SeqCst);
    }

    // The switch to `b` is still outstanding when `c` preempts it, so the
    // delivery must follow `b` to its next dispatch.
    #[test]
    fn test_delivery_survives_superseded_switch() {
        let mut s = started();
        s.arch_mut().defer_deliveries(true);
        let _a = s.spawn(fifo(5), work, 0).unwrap();
        let b = s.spawn(fifo(3), work, 0).unwrap();
        s.signal(b, Some(count)).unwrap();

        s.sig_wait().unwrap();
        assert_eq!(s.current(), Some(b));
        assert!(s.task(b).unwrap().sig_deliver.is_none());

        let c = s.spawn(fifo(7), work, 0).unwrap();
        assert_eq!(s.current(), Some(c));
        assert!(s.task(b).unwrap().sig_deliver.is_some());
        s.arch_mut().complete_switch();
        assert_eq!(COUNTED.load(Ordering::SeqCst), 0);

        s.sig_wait().unwrap();
        assert_eq!(s.current(), Some(b));
        s.arch_mut().complete_switch();
        assert_eq!(COUNTED.load(Ordering::SeqCst), 1);
        assert!(s.task(b).unwrap().sig_deliver.is_none());
        s.arch_mut().complete_switch();
        assert_eq!(COUNTED.load(Ordering::SeqCst), 1);
        s.assert_consistent();
    }

    fn ignore(_: Pid) {}

    #[test]
    fn test_delivery_to_running_task() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        s.arch_mut().clear_events();
        s.signal(a, Some(ignore)).unwrap();
        assert_eq!(s.current(), Some(a));
        assert_eq!(
            s.arch().events(),
            &[
                SwitchEvent::Suspend(a),
                SwitchEvent::Resume(a),
                SwitchEvent::Deliver(a)
            ]
        );
        s.assert_consistent();
    }
}
