//! # Scheduler
//!
//! Core scheduling logic for Kestrel. Strict priority preemption: the head of
//! the ready list always holds the CPU, with round-robin rotation among tasks
//! of equal priority.
//!
//! ## Scheduling points
//!
//! The scheduler never switches on its own. A switch happens only when an
//! operation changes the ready-list head and then calls [`Scheduler::dispatch`]:
//! 1. **Block**: the running task waits on a semaphore or signal
//! 2. **Wake**: a post, signal or activation readies a higher-priority task
//! 3. **Priority change**: `set_priority` or a priority-inheritance boost
//! 4. **Tick**: a round-robin quantum expires with an equal peer waiting
//! 5. **Unlock / exit**: the pending list is merged and the head re-examined
//!
//! ## Scheduler lock
//!
//! `sched_lock` disables preemption without disabling interrupts. While it
//! is held, tasks that would preempt the running task are parked on the
//! pending list, and a running task that is still runnable keeps the CPU.
//!
//! The nesting depth lives in the TCB of the task that took the lock. If
//! that task blocks, the lock goes with it: whoever runs next is governed by
//! its own depth, and the lock is back in force when the owner resumes.

use crate::arch::ContextSwitch;
use crate::config::MIN_TASK_PRIORITY;
use crate::error::{fatal, Errno, FatalError};
use crate::pid::PidRegistry;
use crate::queue::TaskQueues;
use crate::semaphore::SemaphorePool;
use crate::task::{
    BlockReason, Pid, SchedPolicy, TaskConfig, TaskControlBlock, TaskEntry, TaskState, IDLE_CONFIG,
};

/// Outcome of the first phase of a semaphore wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The count was positive; the caller holds the semaphore and keeps running.
    Acquired,
    /// The caller was blocked and a switch was requested. Once it runs again
    /// it reads the outcome with [`Scheduler::wait_result`].
    Blocked,
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub context_switches: u32,
    pub ticks: u64,
    /// Times a semaphore holder's priority was raised by inheritance.
    pub priority_boosts: u32,
    /// Tasks moved from the pending list into the ready list.
    pub pending_merged: u32,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: task arena, lists, semaphore pool and the
/// architecture port. The kernel keeps exactly one, behind a critical-section
/// mutex in `kernel.rs`; tests build their own on [`SimPort`].
///
/// [`SimPort`]: crate::arch::sim::SimPort
pub struct Scheduler<A: ContextSwitch> {
    pub(crate) tasks: PidRegistry<A::Context>,
    pub(crate) queues: TaskQueues,
    pub(crate) sems: SemaphorePool,
    pub(crate) arch: A,

    /// Task whose context is loaded (or about to be, on ports that defer).
    pub(crate) running: Option<Pid>,

    /// Set once the first task has been dispatched.
    pub(crate) started: bool,

    pub(crate) stats: SchedulerStats,
}

impl<A: ContextSwitch> Scheduler<A> {
    pub const fn new(arch: A) -> Self {
        Self {
            tasks: PidRegistry::new(),
            queues: TaskQueues::new(),
            sems: SemaphorePool::new(),
            arch,
            running: None,
            started: false,
            stats: SchedulerStats {
                context_switches: 0,
                ticks: 0,
                priority_boosts: 0,
                pending_merged: 0,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Bring-up
    // -----------------------------------------------------------------------

    /// Install the idle task at pid 0. Failing to do so is fatal.
    pub fn boot(&mut self, idle_entry: TaskEntry) {
        let context = self.arch.initial_state(Pid::IDLE, idle_entry, 0);
        let tcb = TaskControlBlock::new(Pid::IDLE, IDLE_CONFIG, idle_entry, 0, context);
        if self.tasks.insert_reserved(tcb).is_err() {
            fatal(FatalError::PidExhaustedAtBoot);
        }
        self.insert_ready(Pid::IDLE);
        log::info!("scheduler booted, idle task installed");
    }

    /// Dispatch the first task. Everything created and activated before this
    /// call competes on priority.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.merge_pending();
        if self.queues.ready.is_empty() {
            fatal(FatalError::EmptyReadyList);
        }
        self.started = true;
        self.dispatch();
        log::info!("scheduler started with {} tasks", self.tasks.len());
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Create a task in the inactive list.
    ///
    /// Returns `EINVAL` for the idle priority and `EAGAIN` when the pid table
    /// is full.
    pub fn create_task(
        &mut self,
        config: TaskConfig,
        entry: TaskEntry,
        arg: usize,
    ) -> Result<Pid, Errno> {
        if config.priority < MIN_TASK_PRIORITY {
            return Err(Errno::EINVAL);
        }

        let arch = &mut self.arch;
        let pid = self.tasks.assign(|pid| {
            let context = arch.initial_state(pid, entry, arg);
            TaskControlBlock::new(pid, config, entry, arg, context)
        })?;

        self.tcb_mut(pid).state = TaskState::Inactive;
        self.queues.inactive.push_back(pid);
        log::debug!("created task {} at priority {}", pid, config.priority);
        Ok(pid)
    }

    /// Move a created task to the ready list.
    pub fn activate(&mut self, pid: Pid) -> Result<(), Errno> {
        let state = self.tasks.get(pid).ok_or(Errno::ESRCH)?.state;
        if state != TaskState::Inactive {
            return Err(Errno::EINVAL);
        }
        self.queues.inactive.remove(pid);
        if self.add_to_ready(pid) {
            self.dispatch();
        }
        Ok(())
    }

    /// Create and activate.
    pub fn spawn(&mut self, config: TaskConfig, entry: TaskEntry, arg: usize) -> Result<Pid, Errno> {
        let pid = self.create_task(config, entry, arg)?;
        self.activate(pid)?;
        Ok(pid)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Hand the CPU to the ready-list head if it is not already running.
    ///
    /// Returns whether a switch was requested. While the scheduler lock is
    /// held, a running task that is still runnable keeps the CPU.
    pub(crate) fn dispatch(&mut self) -> bool {
        if !self.started {
            return false;
        }
        let Some(next) = self.queues.ready.head() else {
            fatal(FatalError::EmptyReadyList);
        };
        let prev = self.running;
        if prev == Some(next) {
            return false;
        }

        if let Some(prev) = prev {
            if let Some(tcb) = self.tasks.get_mut(prev) {
                if tcb.lockcount > 0 && tcb.state.is_ready_to_run() {
                    return false;
                }
                if tcb.state == TaskState::Running {
                    tcb.state = TaskState::Ready;
                }
                self.arch.save_and_suspend(&mut tcb.context);
            }
        }
        self.reclaim_delivery();

        let tcb = self
            .tasks
            .get_mut(next)
            .unwrap_or_else(|| fatal(FatalError::DanglingPid(next)));
        tcb.state = TaskState::Running;
        tcb.reset_time_slice();
        let deliver = tcb.sig_deliver.take();
        self.running = Some(next);
        self.stats.context_switches += 1;
        log::trace!("switch {:?} -> {}", prev, next);
        self.arch.resume(&mut tcb.context, deliver);
        true
    }

    /// A delivery the port accepted for a task that has not yet been
    /// switched in goes back to that task's TCB, to be handed over again on
    /// its next dispatch.
    pub(crate) fn reclaim_delivery(&mut self) {
        if let Some((deliver, pid)) = self.arch.take_pending_delivery() {
            if let Some(tcb) = self.tasks.get_mut(pid) {
                tcb.sig_deliver.get_or_insert(deliver);
            }
        }
    }

    /// Merge the pending list (unless locked) and dispatch.
    pub fn reschedule(&mut self) -> bool {
        if !self.is_locked() {
            self.merge_pending();
        }
        self.dispatch()
    }

    /// Put the running task behind its equals and reschedule.
    pub fn yield_current(&mut self) {
        let Some(pid) = self.running else {
            return;
        };
        self.tcb_mut(pid).reset_time_slice();
        self.rotate(pid);
        self.reschedule();
    }

    /// Timer tick. Expires the running task's round-robin quantum and rotates
    /// it behind an equal-priority peer if one is waiting.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        if !self.started {
            return;
        }
        let Some(pid) = self.running else {
            return;
        };

        let tcb = self.tcb_mut(pid);
        if tcb.policy != SchedPolicy::RoundRobin || tcb.is_idle() {
            self.reschedule();
            return;
        }
        tcb.ticks_remaining = tcb.ticks_remaining.saturating_sub(1);
        let expired = tcb.ticks_remaining == 0;
        let priority = tcb.sched_priority;

        if expired {
            self.tcb_mut(pid).reset_time_slice();
            let peer_waiting = self
                .queues
                .ready
                .iter()
                .any(|p| p != pid && self.tasks.priority_of(p) == priority);
            if peer_waiting && !self.is_locked() {
                log::trace!("task {} quantum expired", pid);
                self.rotate(pid);
            }
        }
        self.reschedule();
    }

    // -----------------------------------------------------------------------
    // Scheduler lock
    // -----------------------------------------------------------------------

    /// Take one lock level on behalf of the running task.
    pub fn sched_lock(&mut self) {
        let Some(pid) = self.running else {
            log::warn!("sched_lock with no running task");
            return;
        };
        let tcb = self.tcb_mut(pid);
        tcb.lockcount = tcb.lockcount.saturating_add(1);
    }

    /// Drop one lock level. Reaching zero merges the pending list and lets
    /// any deferred preemption happen.
    pub fn sched_unlock(&mut self) {
        let Some(tcb) = self.running.and_then(|pid| self.tasks.get_mut(pid)) else {
            log::warn!("sched_unlock with no running task");
            return;
        };
        if tcb.lockcount == 0 {
            log::warn!("sched_unlock without matching sched_lock");
            return;
        }
        tcb.lockcount -= 1;
        if tcb.lockcount == 0 {
            self.reschedule();
        }
    }

    /// Whether the running task holds the scheduler lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.running
            .and_then(|pid| self.tasks.get(pid))
            .is_some_and(|tcb| tcb.lockcount > 0)
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Change a task's base priority. The effective priority is the larger of
    /// the new base and whatever its semaphore waiters currently lend it.
    pub fn set_priority(&mut self, pid: Pid, priority: u8) -> Result<(), Errno> {
        if priority < MIN_TASK_PRIORITY {
            return Err(Errno::EINVAL);
        }
        let tcb = self.tasks.get_mut(pid).ok_or(Errno::ESRCH)?;
        if tcb.is_idle() {
            return Err(Errno::EPERM);
        }
        tcb.base_priority = priority;

        let effective = priority.max(self.inherited_priority(pid));
        self.requeue(pid, effective);
        self.propagate_to_holder(pid);
        log::debug!("task {} priority {} (effective {})", pid, priority, effective);
        self.reschedule();
        Ok(())
    }

    /// Effective priority of `pid`.
    pub fn priority(&self, pid: Pid) -> Result<u8, Errno> {
        self.tasks.get(pid).map(|t| t.sched_priority).ok_or(Errno::ESRCH)
    }

    // -----------------------------------------------------------------------
    // Generic blocking
    // -----------------------------------------------------------------------

    /// Block the running task on a non-semaphore reason. Semaphore waits go
    /// through `sem_wait`, which keeps the count and holder consistent.
    pub fn block_current(&mut self, reason: BlockReason) -> Result<(), Errno> {
        if reason == BlockReason::Semaphore {
            return Err(Errno::EINVAL);
        }
        if self.arch.in_interrupt() {
            fatal(FatalError::WaitInInterrupt);
        }
        let pid = self.current_or_fatal();
        self.tcb_mut(pid).wake_error = None;
        self.block_task(pid, reason);
        self.dispatch();
        Ok(())
    }

    /// Wake a task blocked on a non-semaphore reason.
    pub fn wake_task(&mut self, pid: Pid) -> Result<(), Errno> {
        let state = self.tasks.get(pid).ok_or(Errno::ESRCH)?.state;
        match state {
            TaskState::Blocked(BlockReason::Semaphore) => Err(Errno::EINVAL),
            TaskState::Blocked(_) => {
                if self.unblock_task(pid) {
                    self.dispatch();
                }
                Ok(())
            }
            _ => Err(Errno::EINVAL),
        }
    }

    /// Second phase of a blocking wait, read by the task once it runs again.
    pub fn wait_result(&mut self) -> Result<(), Errno> {
        let pid = self.current_or_fatal();
        match self.tcb_mut(pid).wake_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Pid of the running task.
    #[inline]
    pub fn current(&self) -> Option<Pid> {
        self.running
    }

    pub(crate) fn current_or_fatal(&self) -> Pid {
        self.running.unwrap_or_else(|| fatal(FatalError::NoRunningTask))
    }

    pub fn task(&self, pid: Pid) -> Option<&TaskControlBlock<A::Context>> {
        self.tasks.get(pid)
    }

    pub fn state(&self, pid: Pid) -> Option<TaskState> {
        self.tasks.get(pid).map(|t| t.state)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn ready_pids(&self) -> &[Pid] {
        self.queues.ready().as_slice()
    }

    pub fn pending_pids(&self) -> &[Pid] {
        self.queues.pending().as_slice()
    }

    pub fn blocked_pids(&self, reason: BlockReason) -> &[Pid] {
        self.queues.blocked(reason).as_slice()
    }

    pub fn queues(&self) -> &TaskQueues {
        &self.queues
    }

    #[inline]
    pub fn arch(&self) -> &A {
        &self.arch
    }

    #[inline]
    pub fn arch_mut(&mut self) -> &mut A {
        &mut self.arch
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::arch::sim::{SimPort, SwitchEvent};
    use crate::config::MAX_TASKS;

    pub(crate) extern "C" fn idle(_: usize) {}
    pub(crate) extern "C" fn work(_: usize) {}

    /// Booted and started scheduler; only idle exists.
    pub(crate) fn started() -> Scheduler<SimPort> {
        let mut s = Scheduler::new(SimPort::new());
        s.boot(idle);
        s.start();
        s
    }

    pub(crate) fn fifo(priority: u8) -> TaskConfig {
        TaskConfig {
            priority,
            policy: SchedPolicy::Fifo,
            time_slice: 0,
        }
    }

    #[test]
    fn test_boot_runs_idle() {
        let s = started();
        assert_eq!(s.current(), Some(Pid::IDLE));
        assert_eq!(s.state(Pid::IDLE), Some(TaskState::Running));
        assert_eq!(s.arch().last_resumed(), Some(Pid::IDLE));
        s.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "pid table exhausted during bring-up")]
    fn test_double_boot_is_fatal() {
        let mut s = Scheduler::new(SimPort::new());
        s.boot(idle);
        s.boot(idle);
    }

    #[test]
    fn test_create_lands_inactive() {
        let mut s = started();
        let pid = s.create_task(fifo(5), work, 3).unwrap();
        assert_eq!(s.state(pid), Some(TaskState::Inactive));
        assert_eq!(s.current(), Some(Pid::IDLE));
        assert_eq!(s.task(pid).unwrap().arg, 3);
        s.assert_consistent();
    }

    #[test]
    fn test_create_rejects_idle_priority() {
        let mut s = started();
        assert_eq!(s.create_task(fifo(0), work, 0).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn test_activate_preempts_lower() {
        let mut s = started();
        let pid = s.spawn(fifo(5), work, 0).unwrap();
        assert_eq!(s.current(), Some(pid));
        assert_eq!(s.state(Pid::IDLE), Some(TaskState::Ready));
        assert_eq!(
            s.arch().events(),
            &[
                SwitchEvent::Resume(Pid::IDLE),
                SwitchEvent::Suspend(Pid::IDLE),
                SwitchEvent::Resume(pid)
            ]
        );
        assert_eq!(s.activate(pid).unwrap_err(), Errno::EINVAL);
        s.assert_consistent();
    }

    #[test]
    fn test_ready_list_sorted_and_fifo() {
        let mut s = started();
        s.sched_lock();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        let b = s.spawn(fifo(9), work, 0).unwrap();
        let c = s.spawn(fifo(5), work, 0).unwrap();
        let d = s.spawn(fifo(9), work, 0).unwrap();
        s.sched_unlock();
        assert_eq!(s.ready_pids(), &[b, d, a, c, Pid::IDLE]);
        assert_eq!(s.current(), Some(b));
        s.assert_consistent();
    }

    #[test]
    fn test_yield_rotates_equals_only() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        let b = s.spawn(fifo(5), work, 0).unwrap();
        assert_eq!(s.current(), Some(a));
        s.yield_current();
        assert_eq!(s.current(), Some(b));
        s.yield_current();
        assert_eq!(s.current(), Some(a));

        let c = s.spawn(fifo(3), work, 0).unwrap();
        s.yield_current();
        assert_eq!(s.current(), Some(b));
        assert_eq!(s.ready_pids().last(), Some(&Pid::IDLE));
        assert!(s.ready_pids().ends_with(&[c, Pid::IDLE]));
        s.assert_consistent();
    }

    #[test]
    fn test_round_robin_quantum() {
        let mut s = started();
        let config = TaskConfig {
            priority: 4,
            policy: SchedPolicy::RoundRobin,
            time_slice: 2,
        };
        let a = s.spawn(config, work, 0).unwrap();
        let b = s.spawn(config, work, 0).unwrap();
        s.tick();
        assert_eq!(s.current(), Some(a));
        s.tick();
        assert_eq!(s.current(), Some(b));
        s.tick();
        s.tick();
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.stats().ticks, 4);
        s.assert_consistent();
    }

    #[test]
    fn test_round_robin_alone_keeps_cpu() {
        let mut s = started();
        let a = s.spawn(TaskConfig::with_priority(4), work, 0).unwrap();
        let switches = s.stats().context_switches;
        for _ in 0..50 {
            s.tick();
        }
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.stats().context_switches, switches);
    }

    #[test]
    fn test_fifo_ignores_quantum() {
        let mut s = started();
        let a = s.spawn(fifo(4), work, 0).unwrap();
        let _b = s.spawn(fifo(4), work, 0).unwrap();
        for _ in 0..50 {
            s.tick();
        }
        assert_eq!(s.current(), Some(a));
    }

    #[test]
    fn test_lock_defers_preemption() {
        let mut s = started();
        let low = s.spawn(fifo(2), work, 0).unwrap();
        s.sched_lock();
        let high = s.spawn(fifo(8), work, 0).unwrap();
        assert_eq!(s.current(), Some(low));
        assert_eq!(s.pending_pids(), &[high]);
        assert_eq!(s.state(high), Some(TaskState::Pending));
        s.sched_unlock();
        assert_eq!(s.current(), Some(high));
        assert!(s.pending_pids().is_empty());
        assert_eq!(s.stats().pending_merged, 1);
        s.assert_consistent();
    }

    #[test]
    fn test_lock_nests() {
        let mut s = started();
        s.sched_lock();
        s.sched_lock();
        let high = s.spawn(fifo(8), work, 0).unwrap();
        s.sched_unlock();
        assert!(s.is_locked());
        assert_eq!(s.current(), Some(Pid::IDLE));
        s.sched_unlock();
        assert_eq!(s.current(), Some(high));
        // Unbalanced unlock is ignored.
        s.sched_unlock();
        assert!(!s.is_locked());
    }

    #[test]
    fn test_interrupt_ready_goes_pending() {
        let mut s = started();
        let pid = s.create_task(fifo(6), work, 0).unwrap();
        s.arch_mut().enter_interrupt();
        s.activate(pid).unwrap();
        assert_eq!(s.state(pid), Some(TaskState::Pending));
        assert_eq!(s.current(), Some(Pid::IDLE));
        s.arch_mut().leave_interrupt();
        assert!(s.reschedule());
        assert_eq!(s.current(), Some(pid));
        s.assert_consistent();
    }

    #[test]
    fn test_set_priority_reorders() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        let b = s.spawn(fifo(3), work, 0).unwrap();
        assert_eq!(s.current(), Some(a));

        s.set_priority(b, 7).unwrap();
        assert_eq!(s.current(), Some(b));
        assert_eq!(s.priority(b), Ok(7));

        s.set_priority(b, 1).unwrap();
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.ready_pids(), &[a, b, Pid::IDLE]);
        s.assert_consistent();
    }

    #[test]
    fn test_set_priority_errors() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        assert_eq!(s.set_priority(a, 0), Err(Errno::EINVAL));
        assert_eq!(s.set_priority(Pid::new(99), 4), Err(Errno::ESRCH));
        assert_eq!(s.set_priority(Pid::IDLE, 4), Err(Errno::EPERM));
    }

    #[test]
    fn test_lowered_running_task_goes_behind_equals() {
        let mut s = started();
        let a = s.spawn(fifo(3), work, 0).unwrap();
        let b = s.spawn(fifo(6), work, 0).unwrap();
        assert_eq!(s.current(), Some(b));
        s.set_priority(b, 3).unwrap();
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.ready_pids(), &[a, b, Pid::IDLE]);
        s.assert_consistent();
    }

    #[test]
    fn test_raised_running_task_stays_ahead_of_equals() {
        let mut s = started();
        let a = s.spawn(fifo(3), work, 0).unwrap();
        let b = s.spawn(fifo(3), work, 0).unwrap();
        assert_eq!(s.current(), Some(a));

        // Under the lock `b` can head the list while `a` keeps the CPU.
        s.sched_lock();
        s.set_priority(b, 6).unwrap();
        assert_eq!(s.ready_pids(), &[b, a, Pid::IDLE]);
        assert_eq!(s.current(), Some(a));

        s.set_priority(a, 6).unwrap();
        assert_eq!(s.ready_pids(), &[a, b, Pid::IDLE]);
        s.sched_unlock();
        assert_eq!(s.current(), Some(a));
        s.assert_consistent();
    }

    #[test]
    fn test_block_and_wake_signal_reason() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        s.block_current(BlockReason::Signal).unwrap();
        assert_eq!(s.state(a), Some(TaskState::Blocked(BlockReason::Signal)));
        assert_eq!(s.current(), Some(Pid::IDLE));
        assert_eq!(s.blocked_pids(BlockReason::Signal), &[a]);
        s.assert_consistent();

        s.wake_task(a).unwrap();
        assert_eq!(s.current(), Some(a));
        assert_eq!(s.wait_result(), Ok(()));
        assert_eq!(s.wake_task(a), Err(Errno::EINVAL));
        s.assert_consistent();
    }

    #[test]
    fn test_block_current_rejects_semaphore_reason() {
        let mut s = started();
        s.spawn(fifo(5), work, 0).unwrap();
        assert_eq!(s.block_current(BlockReason::Semaphore), Err(Errno::EINVAL));
    }

    #[test]
    #[should_panic(expected = "idle task may not block or exit")]
    fn test_idle_cannot_block() {
        let mut s = started();
        let _ = s.block_current(BlockReason::Signal);
    }

    #[test]
    #[should_panic(expected = "attempt to block task")]
    fn test_double_block_is_fatal() {
        let mut s = started();
        let a = s.spawn(fifo(5), work, 0).unwrap();
        s.block_current(BlockReason::MqNotEmpty).unwrap();
        s.block_task(a, BlockReason::Signal);
    }

    #[test]
    #[should_panic(expected = "blocking wait from interrupt context")]
    fn test_block_from_interrupt_is_fatal() {
        let mut s = started();
        s.spawn(fifo(5), work, 0).unwrap();
        s.arch_mut().enter_interrupt();
        let _ = s.block_current(BlockReason::Signal);
    }

    #[test]
    #[should_panic(expected = "corrupt saved context for task 1")]
    fn test_resume_corrupt_context_is_fatal() {
        let mut s = started();
        let a = s.create_task(fifo(5), work, 0).unwrap();
        s.tasks.get_mut(a).unwrap().context.corrupt();
        s.activate(a).unwrap();
    }

    #[test]
    fn test_table_full_then_one_slot_freed() {
        let mut s = started();
        let mut pids = heapless::Vec::<Pid, MAX_TASKS>::new();
        loop {
            match s.create_task(fifo(2), work, 0) {
                Ok(pid) => pids.push(pid).unwrap(),
                Err(err) => {
                    assert_eq!(err, Errno::EAGAIN);
                    break;
                }
            }
        }
        assert_eq!(pids.len(), MAX_TASKS - 1);
        assert_eq!(s.task_count(), MAX_TASKS);

        s.delete_task(pids[2]).unwrap();
        let fresh = s.create_task(fifo(2), work, 0).unwrap();
        assert!(!pids.contains(&fresh));
        assert_eq!(s.create_task(fifo(2), work, 0), Err(Errno::EAGAIN));
        s.assert_consistent();
    }
}
